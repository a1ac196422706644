//! Named cache partitions.
//!
//! A [`CacheStorage`] is shared by every handle cloned from it, so a write
//! through one [`Cache`] is visible to every other reader once awaited.
//! Partitions can be snapshotted to a directory, one JSON file each.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::http::{Request, Response};
use crate::utils::format_age;

/// Extension of partition snapshot files
const SNAPSHOT_EXT: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub method: String,
    pub url: String,
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    fn new(request: &Request, response: Response) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.to_string(),
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        format_age(self.cached_at, Utc::now())
    }

    /// Rebuild the request this entry answers.
    pub fn request(&self) -> Option<Request> {
        Request::new(&self.method, &self.url).ok()
    }
}

type Partition = BTreeMap<String, CachedResponse>;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    name: String,
    entries: Vec<CachedResponse>,
}

/// Clone is cheap; clones share the same partitions.
#[derive(Clone, Default)]
pub struct CacheStorage {
    partitions: Arc<RwLock<BTreeMap<String, Partition>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a partition, creating it empty if needed.
    pub async fn open(&self, name: &str) -> Cache {
        self.partitions
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Cache {
            name: name.to_string(),
            storage: self.clone(),
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.partitions.read().await.contains_key(name)
    }

    /// Partition names.
    pub async fn keys(&self) -> Vec<String> {
        self.partitions.read().await.keys().cloned().collect()
    }

    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.partitions.write().await.remove(name).is_some();
        if removed {
            debug!(partition = name, "Deleted cache partition");
        }
        removed
    }

    /// Look the request up in every partition, by name order.
    pub async fn match_any(&self, request: &Request) -> Option<Response> {
        let key = request.cache_key();
        self.partitions
            .read()
            .await
            .values()
            .find_map(|p| p.get(&key))
            .map(|e| e.response.clone())
    }

    /// Write every partition to `dir` and remove snapshots of partitions
    /// that no longer exist.
    pub async fn persist_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let partitions = self.partitions.read().await;
        let mut written = HashSet::new();
        for (name, entries) in partitions.iter() {
            let file_name = format!("{}.{}", file_stem(name), SNAPSHOT_EXT);
            let snapshot = Snapshot {
                name: name.clone(),
                entries: entries.values().cloned().collect(),
            };
            let contents = serde_json::to_string(&snapshot)?;
            std::fs::write(dir.join(&file_name), contents)
                .with_context(|| format!("Failed to write cache snapshot: {}", name))?;
            written.insert(file_name);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_snapshot = path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT);
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if is_snapshot && !written.contains(&file_name) {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                debug!(file = %file_name, "Removed stale cache snapshot");
            }
        }

        debug!(partitions = partitions.len(), dir = %dir.display(), "Persisted cache storage");
        Ok(())
    }

    /// Load partitions from snapshots in `dir`. A missing directory gives
    /// empty storage; unreadable snapshots are skipped.
    pub async fn load_from(dir: &Path) -> Result<Self> {
        let storage = Self::new();
        if !dir.exists() {
            return Ok(storage);
        }

        {
            let mut partitions = storage.partitions.write().await;
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                    continue;
                }
                let snapshot = std::fs::read_to_string(&path)
                    .context("Failed to read cache snapshot")
                    .and_then(|s| {
                        serde_json::from_str::<Snapshot>(&s)
                            .context("Failed to parse cache snapshot")
                    });
                match snapshot {
                    Ok(snapshot) => {
                        let entries = snapshot
                            .entries
                            .into_iter()
                            .map(|e| (format!("{} {}", e.method, e.url), e))
                            .collect();
                        partitions.insert(snapshot.name, entries);
                    }
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "Skipping cache snapshot");
                    }
                }
            }
        }

        Ok(storage)
    }
}

/// A handle to one named partition.
#[derive(Clone)]
pub struct Cache {
    name: String,
    storage: CacheStorage,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        self.entry(request).await.map(|e| e.response)
    }

    pub async fn entry(&self, request: &Request) -> Option<CachedResponse> {
        self.storage
            .partitions
            .read()
            .await
            .get(&self.name)
            .and_then(|p| p.get(&request.cache_key()))
            .cloned()
    }

    /// Store a response. Only `200` answers to `GET` are kept; returns
    /// whether the entry was written.
    pub async fn put(&self, request: &Request, response: Response) -> bool {
        if !request.is_get() || !response.is_cacheable() {
            debug!(
                partition = %self.name,
                url = %request.url,
                status = response.status,
                "Not caching"
            );
            return false;
        }
        self.storage
            .partitions
            .write()
            .await
            .entry(self.name.clone())
            .or_default()
            .insert(request.cache_key(), CachedResponse::new(request, response));
        true
    }

    pub async fn delete(&self, request: &Request) -> bool {
        self.storage
            .partitions
            .write()
            .await
            .get_mut(&self.name)
            .map(|p| p.remove(&request.cache_key()).is_some())
            .unwrap_or(false)
    }

    /// URLs of the stored requests.
    pub async fn keys(&self) -> Vec<String> {
        self.entries().await.into_iter().map(|e| e.url).collect()
    }

    pub async fn entries(&self) -> Vec<CachedResponse> {
        self.storage
            .partitions
            .read()
            .await
            .get(&self.name)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.storage
            .partitions
            .read()
            .await
            .get(&self.name)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
