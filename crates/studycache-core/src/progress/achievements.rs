use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{debug, error};

use crate::models::{AchievementDefinition, Category, ProgressMap, ACHIEVEMENTS};
use crate::storage::{keys, LocalStorage};

/// Completed-unit counts per achievement category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub proba: usize,
    pub archi: usize,
    pub any: usize,
}

impl CategoryCounts {
    pub fn from_progress(progress: &ProgressMap) -> Self {
        let mut counts = Self::default();
        for record in progress.values().filter(|r| r.is_completed) {
            counts.any += 1;
            if Category::Proba.matches(&record.unit_type) {
                counts.proba += 1;
            }
            if Category::Archi.matches(&record.unit_type) {
                counts.archi += 1;
            }
        }
        counts
    }

    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Proba => self.proba,
            Category::Archi => self.archi,
            Category::Any => self.any,
        }
    }
}

/// Definitions whose requirement is met and that are not earned yet.
pub fn pending_unlocks(
    counts: &CategoryCounts,
    earned: &BTreeSet<String>,
) -> Vec<&'static AchievementDefinition> {
    ACHIEVEMENTS
        .iter()
        .filter(|a| counts.get(a.requirement.category) >= a.requirement.count)
        .filter(|a| !earned.contains(a.key))
        .collect()
}

/// Earned achievements of the user whose session is open, persisted per user
/// as a JSON array. Within a session the set only grows.
pub struct AchievementBook {
    earned: BTreeSet<String>,
    user_id: Option<String>,
    storage: LocalStorage,
}

impl AchievementBook {
    /// An empty book with no user attached.
    pub fn new(storage: LocalStorage) -> Self {
        Self {
            earned: BTreeSet::new(),
            user_id: None,
            storage,
        }
    }

    /// Switch to `user_id` and rehydrate their set. A corrupt entry starts
    /// an empty set.
    pub async fn open(&mut self, user_id: &str) {
        self.earned = match self.storage.get(&keys::earned_badges(user_id)).await {
            Some(saved) => match serde_json::from_str::<Vec<String>>(&saved) {
                Ok(list) => list.into_iter().collect(),
                Err(e) => {
                    error!(error = %e, user_id = %user_id, "Failed to parse earned badges");
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };
        self.user_id = Some(user_id.to_string());
        debug!(user_id = %user_id, count = self.earned.len(), "Loaded earned badges");
    }

    /// Detach from the current user. Their saved set is kept.
    pub fn close(&mut self) {
        self.user_id = None;
        self.earned.clear();
    }

    pub fn earned(&self) -> &BTreeSet<String> {
        &self.earned
    }

    pub fn is_earned(&self, key: &str) -> bool {
        self.earned.contains(key)
    }

    /// Add `key` and write the set back. Returns false if it was already earned.
    pub async fn grant(&mut self, key: &str) -> Result<bool> {
        if !self.earned.insert(key.to_string()) {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    async fn save(&self) -> Result<()> {
        let Some(user_id) = self.user_id.as_deref() else {
            return Ok(());
        };
        let list: Vec<&String> = self.earned.iter().collect();
        let contents = serde_json::to_string(&list)?;
        self.storage.set(&keys::earned_badges(user_id), &contents).await
    }
}
