//! Resource classification for intercepted requests.

use reqwest::Url;

use super::CacheError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "webp"];

/// Path prefix of same-origin script assets
const SCRIPT_PREFIX: &str = "/js/";

/// The site stylesheet
const STYLESHEET: &str = "/style.css";

/// Path fragment marking an API call
const API_PATH: &str = "/api/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Cache-first from the static partition.
    Static,
    /// Cache-first from the dynamic partition.
    Image,
    /// Network-first, JSON error body when offline.
    Api,
    /// Network-first, HTML pages cached.
    Default,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Url,
    manifest: Vec<Url>,
    backend_host: String,
}

impl Classifier {
    /// `manifest` entries may be absolute or relative to `origin`.
    pub fn new(origin: Url, manifest: &[String], backend_host: &str) -> Result<Self, CacheError> {
        let manifest = manifest
            .iter()
            .map(|entry| {
                origin.join(entry).map_err(|e| CacheError::InvalidUrl {
                    url: entry.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            origin,
            manifest,
            backend_host: backend_host.to_string(),
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Absolute manifest URLs, in install order.
    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    /// Resolve a path or URL against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, CacheError> {
        self.origin.join(path).map_err(|e| CacheError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Checked in order: static, image, API, default.
    pub fn classify(&self, url: &Url) -> ResourceClass {
        if self.is_static_asset(url) {
            ResourceClass::Static
        } else if Self::is_image(url) {
            ResourceClass::Image
        } else if self.is_api(url) {
            ResourceClass::Api
        } else {
            ResourceClass::Default
        }
    }

    pub fn is_static_asset(&self, url: &Url) -> bool {
        let script_prefix = format!("{}{}", self.origin_prefix(), SCRIPT_PREFIX);
        self.manifest.iter().any(|m| m == url)
            || url.as_str().starts_with(&script_prefix)
            || url.as_str().contains(STYLESHEET)
    }

    pub fn is_image(url: &Url) -> bool {
        let path = url.path();
        match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            }
            _ => false,
        }
    }

    pub fn is_api(&self, url: &Url) -> bool {
        (!self.backend_host.is_empty() && url.as_str().contains(&self.backend_host))
            || url.as_str().contains(API_PATH)
    }

    /// Whether `url` is the backend host, for background sync.
    pub fn is_backend(&self, url: &str) -> bool {
        !self.backend_host.is_empty() && url.contains(&self.backend_host)
    }

    /// Whether `url` is the bare origin root.
    pub fn is_root(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin() && url.path() == "/" && url.query().is_none()
    }

    fn origin_prefix(&self) -> String {
        self.origin.origin().ascii_serialization()
    }
}
