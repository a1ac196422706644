//! Local durable key/value storage.
//!
//! Holds the saved user record, earned achievements per user, recent login
//! attempts and the music player state between runs. Values are plain strings; the whole map is
//! written through to `local_storage.json` on every change. Writes are
//! last-write-wins across processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::debug;

/// Storage file name in the cache directory
const STORAGE_FILE: &str = "local_storage.json";

/// Well-known keys.
pub mod keys {
    pub const USER: &str = "focusUser";
    pub const LOGIN_ATTEMPTS: &str = "loginAttempts";
    pub const MUSIC_VOLUME: &str = "musicVolume";
    pub const MUSIC_PLAYING: &str = "musicPlaying";

    /// Earned achievements of one user.
    pub fn earned_badges(user_id: &str) -> String {
        format!("earnedBadges:{}", user_id)
    }
}

struct Inner {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
}

/// Clone is cheap and every clone sees the same entries.
#[derive(Clone)]
pub struct LocalStorage {
    inner: Arc<Inner>,
}

impl LocalStorage {
    /// Open (or create) the storage file inside `dir`.
    pub fn open(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(STORAGE_FILE);

        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read local storage file")?;
            serde_json::from_str(&contents).context("Failed to parse local storage file")?
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened local storage");
        Ok(Self {
            inner: Arc::new(Inner {
                path: Some(path),
                entries: Mutex::new(entries),
            }),
        })
    }

    /// Storage that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                path: None,
                entries: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.entries.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.inner.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(ref path) = self.inner.path {
            let contents = serde_json::to_string_pretty(entries)?;
            std::fs::write(path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }
}
