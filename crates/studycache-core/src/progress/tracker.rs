use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::security::{log_suspicious_activity, validate_unit_number, validate_unit_type, ValidationError};
use crate::config::SecurityConfig;
use crate::models::{
    AccessUpdate, AchievementDefinition, CompletionUpsert, ProgressMap, User, UserProgressRecord,
    TOTAL_UNITS,
};
use crate::notify::{AppEvent, Notifier};
use crate::store::{collections, from_row, to_row, Query, RecordStore, PROGRESS_CONFLICT_KEY};

use super::achievements::{pending_unlocks, AchievementBook, CategoryCounts};

/// Completed units over the fixed total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
}

/// Aggregate progress of `progress`. An empty map is 0%.
pub fn aggregate(progress: &ProgressMap) -> Aggregate {
    let completed = progress.values().filter(|r| r.is_completed).count();
    let percent = if TOTAL_UNITS == 0 {
        0.0
    } else {
        (completed as f64 / TOTAL_UNITS as f64 * 100.0).clamp(0.0, 100.0)
    };
    Aggregate {
        completed,
        total: TOTAL_UNITS,
        percent,
    }
}

/// Owns the progress map and earned achievements for one session.
pub struct ProgressTracker {
    store: Arc<dyn RecordStore>,
    notifier: Notifier,
    achievements: AchievementBook,
    max_unit_type_length: usize,
    user: Option<User>,
    progress: ProgressMap,
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Notifier,
        achievements: AchievementBook,
        security: &SecurityConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            achievements,
            max_unit_type_length: security.max_unit_type_length,
            user: None,
            progress: ProgressMap::new(),
        }
    }

    /// Attach `user` and load their earned achievements.
    pub async fn start_session(&mut self, user: User) {
        debug!(user_id = %user.id, "Progress session started");
        self.progress.clear();
        self.achievements.open(&user.id).await;
        self.user = Some(user);
    }

    pub fn end_session(&mut self) {
        self.user = None;
        self.progress.clear();
        self.achievements.close();
        self.emit_progress();
    }

    fn validate_unit(&self, unit_number: i64, unit_type: &str) -> Result<(i64, String), ValidationError> {
        let unit_number = validate_unit_number(unit_number)?;
        let unit_type = validate_unit_type(unit_type, self.max_unit_type_length)?;
        Ok((unit_number, unit_type))
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn progress(&self) -> &ProgressMap {
        &self.progress
    }

    pub fn achievements(&self) -> &AchievementBook {
        &self.achievements
    }

    pub fn is_completed(&self, unit_number: i64, unit_type: &str) -> bool {
        self.progress
            .get(&crate::models::progress_key(unit_type, unit_number))
            .map(|r| r.is_completed)
            .unwrap_or(false)
    }

    /// Replace the map with every stored record of the current user.
    pub async fn load_user_progress(&mut self) {
        let Some(user_id) = self.user.as_ref().map(|u| u.id.clone()) else {
            return;
        };

        let rows = match self
            .store
            .select(collections::PROGRESS, &Query::new().eq("user_id", user_id.clone()))
            .await
        {
            Ok(rows) => rows,
            Err(e) if e.is_missing_relation() => {
                warn!("Progress collection not found");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load progress");
                return;
            }
        };

        self.progress.clear();
        for row in rows {
            match from_row::<UserProgressRecord>(row) {
                Ok(record) => {
                    self.progress.insert(record.key(), record);
                }
                Err(e) => warn!(error = %e, "Skipping malformed progress row"),
            }
        }

        info!(user_id = %user_id, records = self.progress.len(), "Progress loaded");
        self.emit_progress();
        self.evaluate_achievements().await;
    }

    /// Upsert the last-accessed time of a unit in the background.
    /// Failures are logged and never reach the caller; a malformed unit is
    /// dropped without touching the store.
    pub fn record_access(&self, unit_number: i64, unit_type: &str) -> Option<JoinHandle<()>> {
        let user_id = self.user.as_ref()?.id.clone();
        let (unit_number, unit_type) = match self.validate_unit(unit_number, unit_type) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, user_id = %user_id, "Ignoring access to invalid unit");
                return None;
            }
        };
        let store = Arc::clone(&self.store);
        let update = AccessUpdate {
            user_id,
            unit_number,
            unit_type,
            last_accessed: Utc::now(),
        };

        Some(tokio::spawn(async move {
            let row = match to_row(&update) {
                Ok(row) => row,
                Err(e) => {
                    error!(error = %e, "Failed to encode access update");
                    return;
                }
            };
            if let Err(e) = store
                .upsert(collections::PROGRESS, row, PROGRESS_CONFLICT_KEY)
                .await
            {
                error!(error = %e, unit = update.unit_number, kind = %update.unit_type, "Failed to record unit access");
            }
        }))
    }

    /// Mark a unit completed.
    ///
    /// Returns `Err` for malformed identifiers, `Ok(false)` when nobody is
    /// logged in or the store rejected the write (the map is left as it
    /// was), `Ok(true)` once the record is stored and achievements have been
    /// evaluated.
    pub async fn mark_completed(
        &mut self,
        unit_number: i64,
        unit_type: &str,
        score: Option<f64>,
        time_spent: Option<i64>,
    ) -> Result<bool, ValidationError> {
        let Some(user_id) = self.user.as_ref().map(|u| u.id.clone()) else {
            self.notifier.info("Log in to save your progress.");
            return Ok(false);
        };

        let (unit_number, unit_type) = match self.validate_unit(unit_number, unit_type) {
            Ok(valid) => valid,
            Err(e) => {
                self.notifier.error("Invalid data");
                return Err(e);
            }
        };

        let payload = CompletionUpsert::new(&user_id, unit_number, &unit_type, score, time_spent);
        debug!(user_id = %user_id, unit = unit_number, kind = %unit_type, "Saving completion");

        let result = match to_row(&payload) {
            Ok(row) => self
                .store
                .upsert(collections::PROGRESS, row, PROGRESS_CONFLICT_KEY)
                .await
                .and_then(from_row::<UserProgressRecord>),
            Err(e) => Err(e),
        };

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "Failed to save progress");
                log_suspicious_activity(&user_id, &format!("Progress save error: {}", e));
                self.notifier.error("Failed to save progress");
                return Ok(false);
            }
        };

        self.progress.insert(record.key(), record);
        self.emit_progress();
        self.notifier.success("Progress saved!");
        self.evaluate_achievements().await;
        Ok(true)
    }

    pub fn compute_aggregate(&self) -> Aggregate {
        aggregate(&self.progress)
    }

    /// Grant every achievement whose requirement is now met. Running it again
    /// with unchanged progress grants nothing.
    pub async fn evaluate_achievements(&mut self) -> Vec<&'static AchievementDefinition> {
        let counts = CategoryCounts::from_progress(&self.progress);
        let pending = pending_unlocks(&counts, self.achievements.earned());

        let mut granted = Vec::new();
        for achievement in pending {
            match self.achievements.grant(achievement.key).await {
                Ok(true) => {
                    info!(badge = achievement.key, "Achievement unlocked");
                    self.notifier.emit(AppEvent::AchievementUnlocked {
                        key: achievement.key.to_string(),
                        title: achievement.title.to_string(),
                    });
                    granted.push(achievement);
                }
                Ok(false) => {}
                // Kept in memory; the next save will retry persisting it.
                Err(e) => {
                    error!(error = %e, badge = achievement.key, "Failed to persist earned badge");
                    self.notifier.emit(AppEvent::AchievementUnlocked {
                        key: achievement.key.to_string(),
                        title: achievement.title.to_string(),
                    });
                    granted.push(achievement);
                }
            }
        }
        granted
    }

    fn emit_progress(&self) {
        let Aggregate { completed, total, percent } = self.compute_aggregate();
        self.notifier.emit(AppEvent::ProgressChanged {
            completed,
            total,
            percent,
        });
    }
}
