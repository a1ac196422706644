use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Known learning units: 5 probability + 2 architecture.
pub const TOTAL_UNITS: usize = 7;

/// In-memory progress, keyed by [`progress_key`].
pub type ProgressMap = HashMap<String, UserProgressRecord>;

pub fn progress_key(unit_type: &str, unit_number: i64) -> String {
    format!("{}_{}", unit_type, unit_number)
}

/// A `td_progress` row. At most one exists per (user, unit number, unit type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgressRecord {
    pub user_id: String,
    #[serde(rename = "td_number")]
    pub unit_number: i64,
    #[serde(rename = "td_type")]
    pub unit_type: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub time_spent: Option<i64>,
}

impl UserProgressRecord {
    pub fn key(&self) -> String {
        progress_key(&self.unit_type, self.unit_number)
    }
}

/// Upsert payload for a unit visit. Leaves completion columns untouched.
#[derive(Debug, Clone, Serialize)]
pub struct AccessUpdate {
    pub user_id: String,
    #[serde(rename = "td_number")]
    pub unit_number: i64,
    #[serde(rename = "td_type")]
    pub unit_type: String,
    pub last_accessed: DateTime<Utc>,
}

/// Upsert payload for a completion. Score and time spent are always written,
/// so a repeated completion replaces the previous values, nulls included.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionUpsert {
    pub user_id: String,
    #[serde(rename = "td_number")]
    pub unit_number: i64,
    #[serde(rename = "td_type")]
    pub unit_type: String,
    pub is_completed: bool,
    pub completed_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub score: Option<f64>,
    pub time_spent: Option<i64>,
}

impl CompletionUpsert {
    pub fn new(
        user_id: &str,
        unit_number: i64,
        unit_type: &str,
        score: Option<f64>,
        time_spent: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            unit_number,
            unit_type: unit_type.to_string(),
            is_completed: true,
            completed_at: now,
            last_accessed: now,
            score,
            time_spent,
        }
    }
}
