//! In-process record store.
//!
//! Honours the same upsert-on-conflict semantics as the hosted backend:
//! an upsert merges its columns into the row sharing the conflict key and
//! leaves the other columns alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Query, RecordStore, Row, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    unique: HashMap<String, Vec<String>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts that repeat a value of `column` in `collection`.
    pub fn with_unique(mut self, collection: &str, column: &str) -> Self {
        self.unique
            .entry(collection.to_string())
            .or_default()
            .push(column.to_string());
        self
    }

    /// Make every subsequent call fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of a collection, for inspection.
    pub async fn rows(&self, collection: &str) -> Vec<Row> {
        self.tables
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::ServerError("record store unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn assign_id(&self, row: &mut Row) {
        if !row.contains_key("id") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            row.insert("id".to_string(), Value::String(id.to_string()));
        }
    }

    fn check_unique(&self, collection: &str, existing: &[Row], row: &Row) -> Result<(), StoreError> {
        let Some(columns) = self.unique.get(collection) else {
            return Ok(());
        };
        for column in columns {
            if let Some(value) = row.get(column) {
                if existing.iter().any(|r| r.get(column) == Some(value)) {
                    return Err(StoreError::UniqueViolation(format!(
                        "{}.{} already contains {}",
                        collection, column, value
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .get(collection)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, mut row: Row) -> Result<Row, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(collection.to_string()).or_default();
        self.check_unique(collection, rows, &row)?;
        self.assign_id(&mut row);
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, collection: &str, query: &Query, changes: Row) -> Result<Vec<Row>, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(collection) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                for (column, value) in &changes {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn upsert(&self, collection: &str, row: Row, on_conflict: &[&str]) -> Result<Row, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(collection.to_string()).or_default();

        let position = rows.iter().position(|existing| {
            on_conflict
                .iter()
                .all(|column| existing.get(*column) == row.get(*column))
        });

        if let Some(index) = position {
            let existing = &mut rows[index];
            for (column, value) in row {
                existing.insert(column, value);
            }
            return Ok(existing.clone());
        }

        let mut row = row;
        self.assign_id(&mut row);
        rows.push(row.clone());
        Ok(row)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.get(collection).map(|rows| rows.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_merges_on_conflict_key() {
        let store = MemoryStore::new();
        let key = ["user_id", "td_number", "td_type"];

        store
            .upsert(
                "td_progress",
                row(json!({"user_id": "u1", "td_number": 1, "td_type": "proba", "is_completed": true})),
                &key,
            )
            .await
            .unwrap();
        let merged = store
            .upsert(
                "td_progress",
                row(json!({"user_id": "u1", "td_number": 1, "td_type": "proba", "last_accessed": "2026-01-01T00:00:00Z"})),
                &key,
            )
            .await
            .unwrap();

        assert_eq!(merged["is_completed"], true);
        assert_eq!(merged["last_accessed"], "2026-01-01T00:00:00Z");
        assert_eq!(store.rows("td_progress").await.len(), 1);

        // Same number, different type is a distinct record
        store
            .upsert(
                "td_progress",
                row(json!({"user_id": "u1", "td_number": 1, "td_type": "archi"})),
                &key,
            )
            .await
            .unwrap();
        assert_eq!(store.count("td_progress").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_enforces_unique() {
        let store = MemoryStore::new().with_unique("users", "email");
        let inserted = store
            .insert("users", row(json!({"username": "alice", "email": "a@x.io"})))
            .await
            .unwrap();
        assert_eq!(inserted["id"], "1");

        let err = store
            .insert("users", row(json!({"username": "bob", "email": "a@x.io"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_update_and_offline() {
        let store = MemoryStore::new();
        store
            .insert("users", row(json!({"username": "alice"})))
            .await
            .unwrap();
        let updated = store
            .update(
                "users",
                &Query::new().eq("username", "alice"),
                row(json!({"last_login": "now"})),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["last_login"], "now");

        store.set_offline(true);
        assert!(store.select("users", &Query::new()).await.is_err());
    }
}
