//! Record store access.
//!
//! The hosted backend is treated as an opaque record store offering
//! select-with-filter, insert, update and upsert-on-conflict over three
//! collections. `RestStore` speaks the backend's REST dialect over HTTP;
//! `MemoryStore` keeps rows in process with the same conflict-key semantics.

pub mod client;
pub mod error;
pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub use client::RestStore;
pub use error::StoreError;
pub use memory::MemoryStore;

/// A single record as the store sees it.
pub type Row = serde_json::Map<String, Value>;

/// Collection names.
pub mod collections {
    pub const USERS: &str = "users";
    pub const PROGRESS: &str = "td_progress";
    pub const NEWSLETTER: &str = "newsletter_subscriptions";
}

/// Conflict key of the progress collection.
pub const PROGRESS_CONFLICT_KEY: &[&str] = &["user_id", "td_number", "td_type"];

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    /// Matches when any of the column/value pairs is equal.
    AnyEq(Vec<(String, Value)>),
}

impl Condition {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::Eq(column, value) => row.get(column) == Some(value),
            Condition::AnyEq(pairs) => pairs.iter().any(|(c, v)| row.get(c) == Some(v)),
        }
    }
}

/// A conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.to_string(), value.into()));
        self
    }

    pub fn any_eq(mut self, pairs: &[(&str, Value)]) -> Self {
        self.conditions.push(Condition::AnyEq(
            pairs.iter().map(|(c, v)| (c.to_string(), v.clone())).collect(),
        ));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Insert a row and return it as stored.
    async fn insert(&self, collection: &str, row: Row) -> Result<Row, StoreError>;

    /// Apply `changes` to every row matching `query`; returns the updated rows.
    async fn update(&self, collection: &str, query: &Query, changes: Row) -> Result<Vec<Row>, StoreError>;

    /// Insert, or merge into the row that shares the `on_conflict` columns.
    async fn upsert(&self, collection: &str, row: Row, on_conflict: &[&str]) -> Result<Row, StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidResponse(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_query_matching() {
        let r = row(json!({"username": "alice", "email": "a@x.io", "id": "7"}));
        assert!(Query::new().eq("username", "alice").matches(&r));
        assert!(!Query::new().eq("username", "bob").matches(&r));
        assert!(Query::new()
            .any_eq(&[("username", json!("bob")), ("email", json!("a@x.io"))])
            .matches(&r));
        assert!(Query::new().matches(&r));
    }
}
