//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the record store endpoint, the site origin served through
//! the offline cache and the cache partition names for the current release.
//!
//! Configuration is stored at `~/.config/studycache/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "studycache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the record store URL
pub const STORE_URL_ENV: &str = "STUDYCACHE_STORE_URL";

/// Environment variable overriding the record store API key
pub const STORE_KEY_ENV: &str = "STUDYCACHE_STORE_KEY";

const DEFAULT_STORE_URL: &str = "https://eznzfgcwbqcckkvhsdhi.supabase.co";
const DEFAULT_ORIGIN: &str = "http://localhost:8080";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_url: String,
    pub store_key: Option<String>,
    pub origin: String,
    pub last_username: Option<String>,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            store_key: None,
            origin: DEFAULT_ORIGIN.to_string(),
            last_username: None,
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Names of the three live cache partitions and the install manifest.
/// Bumping a name on release makes activation purge the old partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root_name: String,
    pub static_name: String,
    pub dynamic_name: String,
    pub manifest: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_name: "focus-isep-v1.2.0".to_string(),
            static_name: "focus-isep-static-v1.1.0".to_string(),
            dynamic_name: "focus-isep-dynamic-v1.0.0".to_string(),
            manifest: [
                "/",
                "/index.html",
                "/style.css",
                "/js/config.js",
                "/js/security.js",
                "/js/theme-manager.js",
                "/js/auth-manager.js",
                "/js/progress-manager.js",
                "/js/badge-manager.js",
                "/js/legal-pages.js",
                "/js/app.js",
                "/manifest.json",
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
                "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2",
                "https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl CacheConfig {
    /// The three partition names that survive activation.
    pub fn current_names(&self) -> [&str; 3] {
        [&self.root_name, &self.static_name, &self.dynamic_name]
    }
}

/// Input limits and login rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_username_length: usize,
    pub max_email_length: usize,
    pub max_unit_type_length: usize,
    pub login_attempts: usize,
    pub window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_username_length: 50,
            max_email_length: 255,
            max_unit_type_length: 50,
            login_attempts: 5,
            window_secs: 15 * 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `STUDYCACHE_STORE_URL` / `STUDYCACHE_STORE_KEY` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(STORE_URL_ENV) {
            if !url.trim().is_empty() {
                self.store_url = url.trim().to_string();
            }
        }
        if let Ok(key) = std::env::var(STORE_KEY_ENV) {
            if !key.trim().is_empty() {
                self.store_key = Some(key.trim().to_string());
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Host name of the record store, used to recognise API traffic.
    pub fn backend_host(&self) -> Result<String> {
        let url = Url::parse(&self.store_url)?;
        url.host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| anyhow::anyhow!("Store URL has no host: {}", self.store_url))
    }

    pub fn origin_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.origin)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_partition_names() {
        let config = Config::default();
        assert_eq!(
            config.cache.current_names(),
            [
                "focus-isep-v1.2.0",
                "focus-isep-static-v1.1.0",
                "focus-isep-dynamic-v1.0.0"
            ]
        );
    }

    #[test]
    fn test_backend_host() {
        let config = Config::default();
        assert_eq!(
            config.backend_host().unwrap(),
            "eznzfgcwbqcckkvhsdhi.supabase.co"
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"origin": "https://focus.example"}"#).unwrap();
        assert_eq!(config.origin, "https://focus.example");
        assert_eq!(config.security.login_attempts, 5);
        assert_eq!(config.cache.manifest.len(), 15);
    }
}
