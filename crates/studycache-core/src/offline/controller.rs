use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::classify::{Classifier, ResourceClass};
use super::error::CacheError;
use super::fetch::{FetchError, Fetcher};
use super::http::{Destination, Request, Response};
use super::messages::{ControlMessage, ControlReply, PartitionInfo};
use super::storage::{Cache, CacheStorage};
use crate::config::CacheConfig;

// Constants

/// Concurrent fetches during bulk operations.
const MAX_CONCURRENT: usize = 5;

/// Tag that triggers a background sync.
pub const SYNC_TAG: &str = "background-sync";

/// Cached page served for offline navigations.
const HOME_DOCUMENT: &str = "/index.html";

const STATIC_UNAVAILABLE: &str = "Ressource non disponible";
const PAGE_UNAVAILABLE: &str = "Ressource non disponible hors ligne";
const API_OFFLINE_ERROR: &str = "Hors ligne";
const API_OFFLINE_MESSAGE: &str = "Les données ne sont pas disponibles hors ligne";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Waiting for activation.
    Installed,
    Activating,
    Active,
    /// Install failed; this controller never activates.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not intercepted; the caller goes to the network itself.
    Passthrough,
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(r) => Some(r),
            FetchOutcome::Passthrough => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub refreshed: usize,
    pub failed: usize,
}

pub struct CacheController {
    config: CacheConfig,
    classifier: Classifier,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    state: WorkerState,
    skip_waiting: bool,
    clients_claimed: bool,
    online: bool,
}

impl CacheController {
    pub fn new(
        config: CacheConfig,
        classifier: Classifier,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            classifier,
            caches,
            fetcher,
            state: WorkerState::Parsed,
            skip_waiting: false,
            clients_claimed: false,
            online: true,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Resume a lifecycle state saved by an earlier run.
    pub fn restore_state(&mut self, state: WorkerState) {
        self.state = match state {
            // An interrupted transition starts over
            WorkerState::Installing => WorkerState::Parsed,
            WorkerState::Activating => WorkerState::Installed,
            other => other,
        };
        self.clients_claimed = self.state == WorkerState::Active;
    }

    /// Set the connectivity flag without triggering a sync.
    pub fn restore_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed
    }

    // ===== Lifecycle =====

    /// Fetch the whole manifest into the static partition. Every URL must
    /// answer `200`; otherwise nothing is stored and the controller becomes
    /// redundant.
    pub async fn install(&mut self) -> Result<(), CacheError> {
        if matches!(self.state, WorkerState::Active) {
            return Err(CacheError::InvalidState {
                action: "install",
                state: self.state.to_string(),
            });
        }

        info!(
            partition = %self.config.static_name,
            urls = self.classifier.manifest().len(),
            "Installing offline cache"
        );
        self.state = WorkerState::Installing;

        let manifest = self.classifier.manifest().to_vec();
        let fetched = match self.fetch_all(&manifest).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "Install failed");
                self.state = WorkerState::Redundant;
                return Err(e);
            }
        };

        let cache = self.caches.open(&self.config.static_name).await;
        for (request, response) in fetched {
            cache.put(&request, response).await;
        }

        self.state = WorkerState::Installed;
        self.skip_waiting = true;
        info!("Offline cache installed");
        Ok(())
    }

    /// Purge partitions from earlier releases and take control.
    /// Returns the deleted partition names.
    pub async fn activate(&mut self) -> Result<Vec<String>, CacheError> {
        if self.state != WorkerState::Installed {
            return Err(CacheError::InvalidState {
                action: "activate",
                state: self.state.to_string(),
            });
        }

        self.state = WorkerState::Activating;
        let deleted = self.clear_old_caches().await;
        self.clients_claimed = true;
        self.state = WorkerState::Active;

        info!(deleted = deleted.len(), "Offline cache active");
        Ok(deleted)
    }

    /// Delete every partition that is not one of the current names.
    pub async fn clear_old_caches(&self) -> Vec<String> {
        let current = self.config.current_names();
        let mut deleted = Vec::new();
        for name in self.caches.keys().await {
            if !current.contains(&name.as_str()) && self.caches.delete(&name).await {
                debug!(partition = %name, "Removed old cache partition");
                deleted.push(name);
            }
        }
        deleted
    }

    // ===== Fetch interception =====

    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if self.state != WorkerState::Active || !request.is_get() {
            return FetchOutcome::Passthrough;
        }

        let response = match self.classifier.classify(&request.url) {
            ResourceClass::Static => self.handle_static(request).await,
            ResourceClass::Image => self.handle_image(request).await,
            ResourceClass::Api => self.handle_api(request).await,
            ResourceClass::Default => self.handle_default(request).await,
        };
        FetchOutcome::Respond(response)
    }

    /// Cache-first from the static partition.
    async fn handle_static(&self, request: &Request) -> Response {
        let cache = self.static_cache().await;
        if let Some(hit) = cache.match_request(request).await {
            debug!(url = %request.url, "Static asset from cache");
            return hit;
        }

        match self.network(request).await {
            Ok(response) => {
                cache.put(request, response.clone()).await;
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Static asset unavailable");
                if self.classifier.is_root(&request.url) {
                    if let Some(home) = self.cached_home(&cache).await {
                        return home;
                    }
                }
                Response::service_unavailable(STATIC_UNAVAILABLE)
            }
        }
    }

    /// Cache-first from the dynamic partition.
    async fn handle_image(&self, request: &Request) -> Response {
        let cache = self.dynamic_cache().await;
        if let Some(hit) = cache.match_request(request).await {
            debug!(url = %request.url, "Image from cache");
            return hit;
        }

        match self.network(request).await {
            Ok(response) => {
                cache.put(request, response.clone()).await;
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Image unavailable");
                Response::empty_not_found()
            }
        }
    }

    /// Network-first, cached copy when offline.
    async fn handle_api(&self, request: &Request) -> Response {
        let cache = self.dynamic_cache().await;
        match self.network(request).await {
            Ok(response) => {
                cache.put(request, response.clone()).await;
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "API offline, trying cache");
                if let Some(hit) = cache.match_request(request).await {
                    return hit;
                }
                let body = json!({
                    "error": API_OFFLINE_ERROR,
                    "message": API_OFFLINE_MESSAGE,
                });
                Response::new(503, body.to_string())
                    .with_status_text("Service Unavailable")
                    .with_header("content-type", "application/json")
            }
        }
    }

    /// Network-first; only HTML pages are kept.
    async fn handle_default(&self, request: &Request) -> Response {
        let cache = self.dynamic_cache().await;
        match self.network(request).await {
            Ok(response) => {
                if response.is_html() {
                    cache.put(request, response.clone()).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Offline, trying cache");
                if let Some(hit) = cache.match_request(request).await {
                    return hit;
                }
                if request.destination == Destination::Document {
                    if let Some(home) = self.any_cached_home().await {
                        return home;
                    }
                }
                Response::service_unavailable(PAGE_UNAVAILABLE)
            }
        }
    }

    async fn network(&self, request: &Request) -> Result<Response, FetchError> {
        if !self.online {
            return Err(FetchError::Offline);
        }
        self.fetcher.fetch(request).await
    }

    async fn cached_home(&self, cache: &Cache) -> Option<Response> {
        let request = self.home_request()?;
        cache.match_request(&request).await
    }

    async fn any_cached_home(&self) -> Option<Response> {
        let request = self.home_request()?;
        self.caches.match_any(&request).await
    }

    fn home_request(&self) -> Option<Request> {
        self.classifier
            .resolve(HOME_DOCUMENT)
            .ok()
            .map(Request::get_url)
    }

    async fn static_cache(&self) -> Cache {
        self.caches.open(&self.config.static_name).await
    }

    async fn dynamic_cache(&self) -> Cache {
        self.caches.open(&self.config.dynamic_name).await
    }

    // ===== Messages =====

    pub async fn handle_message(&mut self, message: ControlMessage) -> Option<ControlReply> {
        debug!(message = ?message, "Control message");
        match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting = true;
                if self.state == WorkerState::Installed {
                    if let Err(e) = self.activate().await {
                        warn!(error = %e, "Skip-waiting activation failed");
                    }
                }
                None
            }
            ControlMessage::CacheResources(urls) => {
                if let Err(e) = self.cache_additional_resources(&urls).await {
                    warn!(error = %e, "Failed to cache additional resources");
                }
                None
            }
            ControlMessage::GetCacheInfo => Some(ControlReply::CacheInfo(self.cache_info().await)),
            ControlMessage::ClearCache => {
                let deleted = self.clear_old_caches().await;
                info!(deleted = deleted.len(), "Old caches cleared");
                None
            }
        }
    }

    /// Add URLs to the dynamic partition, all or nothing.
    pub async fn cache_additional_resources(&self, urls: &[String]) -> Result<usize, CacheError> {
        let resolved = urls
            .iter()
            .map(|u| self.classifier.resolve(u))
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = self.fetch_all(&resolved).await?;
        let cache = self.dynamic_cache().await;
        let count = fetched.len();
        for (request, response) in fetched {
            cache.put(&request, response).await;
        }
        info!(count = count, "Cached additional resources");
        Ok(count)
    }

    pub async fn cache_info(&self) -> BTreeMap<String, PartitionInfo> {
        let mut info = BTreeMap::new();
        for name in self.caches.keys().await {
            let urls = self.caches.open(&name).await.keys().await;
            info.insert(
                name,
                PartitionInfo {
                    size: urls.len(),
                    urls,
                },
            );
        }
        info
    }

    /// Fetch every URL, requiring `200` from each.
    async fn fetch_all(&self, urls: &[Url]) -> Result<Vec<(Request, Response)>, CacheError> {
        let mut fetched = Vec::with_capacity(urls.len());
        for chunk in urls.chunks(MAX_CONCURRENT) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|url| {
                    let request = Request::get_url(url.clone());
                    async move {
                        let result = self.network(&request).await;
                        (request, result)
                    }
                })
                .collect();

            for (request, result) in futures::future::join_all(futures).await {
                let response = result.map_err(|source| CacheError::Fetch {
                    url: request.url.to_string(),
                    source,
                })?;
                if !response.is_cacheable() {
                    return Err(CacheError::BadStatus {
                        url: request.url.to_string(),
                        status: response.status,
                    });
                }
                fetched.push((request, response));
            }
        }
        Ok(fetched)
    }

    // ===== Connectivity & sync =====

    pub async fn on_sync(&self, tag: &str) -> Option<SyncReport> {
        if tag != SYNC_TAG {
            debug!(tag = tag, "Ignoring sync tag");
            return None;
        }
        Some(self.background_sync().await)
    }

    /// Track connectivity. Coming back online runs a background sync.
    pub async fn set_online(&mut self, online: bool) -> Option<SyncReport> {
        let was_online = std::mem::replace(&mut self.online, online);
        info!(online = online, "Connectivity changed");
        if online && !was_online {
            Some(self.background_sync().await)
        } else {
            None
        }
    }

    /// Re-fetch cached backend responses and replace those that answer `200`.
    /// Failures are logged and left for the next sync.
    pub async fn background_sync(&self) -> SyncReport {
        let cache = self.dynamic_cache().await;
        let pending: Vec<Request> = cache
            .entries()
            .await
            .into_iter()
            .filter(|e| self.classifier.is_backend(&e.url))
            .filter_map(|e| e.request())
            .collect();

        let mut report = SyncReport::default();
        for chunk in pending.chunks(MAX_CONCURRENT) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|request| async move { (request, self.network(request).await) })
                .collect();

            for (request, result) in futures::future::join_all(futures).await {
                match result {
                    Ok(response) if response.is_cacheable() => {
                        cache.put(request, response).await;
                        debug!(url = %request.url, "Synchronised");
                        report.refreshed += 1;
                    }
                    Ok(response) => {
                        debug!(url = %request.url, status = response.status, "Sync kept cached copy");
                    }
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "Sync failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(refreshed = report.refreshed, failed = report.failed, "Background sync done");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ORIGIN: &str = "https://focus.example";
    const BACKEND: &str = "abc.supabase.co";

    /// Serves scripted responses; unknown URLs and offline mode are network errors.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<HashMap<String, Response>>,
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn serve(&self, url: &str, response: Response) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), response);
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }

        fn go_online(&self) {
            self.offline.store(false, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Offline);
            }
            self.responses
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Network("connection refused".to_string()))
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            manifest: vec!["/".to_string(), "/index.html".to_string(), "/style.css".to_string()],
            ..CacheConfig::default()
        }
    }

    fn url(path: &str) -> String {
        format!("{}{}", ORIGIN, path)
    }

    fn serve_manifest(fetcher: &ScriptedFetcher) {
        fetcher.serve(&url("/"), Response::ok("<h1>root</h1>", "text/html"));
        fetcher.serve(&url("/index.html"), Response::ok("<h1>home</h1>", "text/html"));
        fetcher.serve(&url("/style.css"), Response::ok("body{}", "text/css"));
    }

    fn controller(fetcher: Arc<ScriptedFetcher>, caches: CacheStorage) -> CacheController {
        let config = config();
        let classifier =
            Classifier::new(Url::parse(ORIGIN).unwrap(), &config.manifest, BACKEND).unwrap();
        CacheController::new(config, classifier, caches, fetcher)
    }

    async fn active_controller() -> (CacheController, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::default());
        serve_manifest(&fetcher);
        let mut ctl = controller(fetcher.clone(), CacheStorage::new());
        ctl.install().await.unwrap();
        ctl.activate().await.unwrap();
        (ctl, fetcher)
    }

    async fn respond(ctl: &CacheController, request: Request) -> Response {
        match ctl.handle_fetch(&request).await {
            FetchOutcome::Respond(r) => r,
            FetchOutcome::Passthrough => panic!("request was not intercepted"),
        }
    }

    #[tokio::test]
    async fn test_install_caches_manifest() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        serve_manifest(&fetcher);
        let caches = CacheStorage::new();
        let mut ctl = controller(fetcher, caches.clone());

        ctl.install().await.unwrap();
        assert_eq!(ctl.state(), WorkerState::Installed);
        assert!(ctl.skip_waiting_requested());

        let info = ctl.cache_info().await;
        assert_eq!(info["focus-isep-static-v1.1.0"].size, 3);
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        serve_manifest(&fetcher);
        fetcher.serve(&url("/style.css"), Response::new(500, "boom"));
        let caches = CacheStorage::new();
        let mut ctl = controller(fetcher, caches.clone());

        let err = ctl.install().await.unwrap_err();
        assert!(matches!(err, CacheError::BadStatus { status: 500, .. }));
        assert_eq!(ctl.state(), WorkerState::Redundant);
        assert!(!caches.has("focus-isep-static-v1.1.0").await);
        assert!(ctl.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_activation_purges_only_old_partitions() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        serve_manifest(&fetcher);
        let caches = CacheStorage::new();
        for name in [
            "focus-isep-v1.1.0",
            "focus-isep-static-v1.0.0",
            "focus-isep-v1.2.0",
            "focus-isep-dynamic-v1.0.0",
        ] {
            caches.open(name).await;
        }
        let mut ctl = controller(fetcher, caches.clone());
        ctl.install().await.unwrap();

        let mut deleted = ctl.activate().await.unwrap();
        deleted.sort();
        assert_eq!(deleted, vec!["focus-isep-static-v1.0.0", "focus-isep-v1.1.0"]);
        assert_eq!(
            caches.keys().await,
            vec![
                "focus-isep-dynamic-v1.0.0",
                "focus-isep-static-v1.1.0",
                "focus-isep-v1.2.0"
            ]
        );
        assert!(ctl.clients_claimed());
        assert_eq!(ctl.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_only_active_get_requests_are_intercepted() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        serve_manifest(&fetcher);
        let mut ctl = controller(fetcher, CacheStorage::new());
        let home = Request::get(&url("/index.html")).unwrap();
        assert_eq!(ctl.handle_fetch(&home).await, FetchOutcome::Passthrough);

        ctl.install().await.unwrap();
        ctl.activate().await.unwrap();
        let post = Request::new("POST", &url("/api/progress")).unwrap();
        assert_eq!(ctl.handle_fetch(&post).await, FetchOutcome::Passthrough);
        assert!(ctl.handle_fetch(&home).await.response().is_some());
    }

    #[tokio::test]
    async fn test_static_asset_served_offline_after_first_fetch() {
        let (ctl, fetcher) = active_controller().await;
        let script = url("/js/quiz.js");
        fetcher.serve(&script, Response::ok("quiz()", "application/javascript"));

        let first = respond(&ctl, Request::get(&script).unwrap()).await;
        assert_eq!(first.text(), "quiz()");

        fetcher.go_offline();
        let calls = fetcher.calls();
        let second = respond(&ctl, Request::get(&script).unwrap()).await;
        assert_eq!(second.status, 200);
        assert_eq!(second.text(), "quiz()");
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_static_failure_falls_back() {
        let (ctl, fetcher) = active_controller().await;
        fetcher.go_offline();

        let missing = respond(&ctl, Request::get(&url("/js/new.js")).unwrap()).await;
        assert_eq!(missing.status, 503);
        assert_eq!(missing.text(), STATIC_UNAVAILABLE);

        // The root is cached from install, so it is served directly
        let root = respond(&ctl, Request::get(&url("/")).unwrap()).await;
        assert_eq!(root.text(), "<h1>root</h1>");
    }

    #[tokio::test]
    async fn test_root_falls_back_to_home_document() {
        let (ctl, fetcher) = active_controller().await;
        let root = Request::get(&url("/")).unwrap();
        ctl.caches()
            .open("focus-isep-static-v1.1.0")
            .await
            .delete(&root)
            .await;
        fetcher.go_offline();

        let response = respond(&ctl, root).await;
        assert_eq!(response.text(), "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_image_cache_first_and_not_found_offline() {
        let (ctl, fetcher) = active_controller().await;
        let logo = url("/img/logo.png");
        fetcher.serve(&logo, Response::ok(vec![0x89, 0x50], "image/png"));

        respond(&ctl, Request::get(&logo).unwrap()).await;
        let cached = ctl
            .caches()
            .open("focus-isep-dynamic-v1.0.0")
            .await
            .keys()
            .await;
        assert_eq!(cached, vec![logo.clone()]);

        fetcher.go_offline();
        assert_eq!(respond(&ctl, Request::get(&logo).unwrap()).await.status, 200);
        let other = respond(&ctl, Request::get(&url("/img/other.gif")).unwrap()).await;
        assert_eq!(other.status, 404);
        assert!(other.body.is_empty());
    }

    #[tokio::test]
    async fn test_api_prefers_cached_copy_over_error_body() {
        let (ctl, fetcher) = active_controller().await;
        let api = "https://abc.supabase.co/rest/v1/td_progress?user_id=eq.1";
        fetcher.serve(api, Response::ok(r#"[{"td_number":3}]"#, "application/json"));

        respond(&ctl, Request::get(api).unwrap()).await;
        fetcher.go_offline();

        let cached = respond(&ctl, Request::get(api).unwrap()).await;
        assert_eq!(cached.status, 200);
        assert_eq!(cached.text(), r#"[{"td_number":3}]"#);

        let uncached = respond(&ctl, Request::get(&url("/api/stats")).unwrap()).await;
        assert_eq!(uncached.status, 503);
        assert_eq!(uncached.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&uncached.body).unwrap();
        assert_eq!(body["error"], API_OFFLINE_ERROR);
        assert_eq!(body["message"], API_OFFLINE_MESSAGE);
    }

    #[tokio::test]
    async fn test_api_error_status_is_not_cached() {
        let (ctl, fetcher) = active_controller().await;
        let api = url("/api/stats");
        fetcher.serve(&api, Response::new(500, "oops"));

        assert_eq!(respond(&ctl, Request::get(&api).unwrap()).await.status, 500);
        let dynamic = ctl.caches().open("focus-isep-dynamic-v1.0.0").await;
        assert!(dynamic.is_empty().await);
    }

    #[tokio::test]
    async fn test_default_caches_html_only() {
        let (ctl, fetcher) = active_controller().await;
        fetcher.serve(&url("/legal.html"), Response::ok("<p>legal</p>", "text/html"));
        fetcher.serve(&url("/data.txt"), Response::ok("plain", "text/plain"));

        respond(&ctl, Request::get(&url("/legal.html")).unwrap()).await;
        respond(&ctl, Request::get(&url("/data.txt")).unwrap()).await;

        let dynamic = ctl.caches().open("focus-isep-dynamic-v1.0.0").await;
        assert_eq!(dynamic.keys().await, vec![url("/legal.html")]);
    }

    #[tokio::test]
    async fn test_default_offline_fallbacks() {
        let (ctl, fetcher) = active_controller().await;
        fetcher.serve(&url("/legal.html"), Response::ok("<p>legal</p>", "text/html"));
        respond(&ctl, Request::get(&url("/legal.html")).unwrap()).await;
        fetcher.go_offline();

        let legal = respond(&ctl, Request::get(&url("/legal.html")).unwrap()).await;
        assert_eq!(legal.text(), "<p>legal</p>");

        let page = respond(&ctl, Request::document(&url("/unknown")).unwrap()).await;
        assert_eq!(page.text(), "<h1>home</h1>");

        let other = respond(&ctl, Request::get(&url("/unknown")).unwrap()).await;
        assert_eq!(other.status, 503);
        assert_eq!(other.text(), PAGE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_messages() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        serve_manifest(&fetcher);
        fetcher.serve(&url("/legal.html"), Response::ok("<p>legal</p>", "text/html"));
        let caches = CacheStorage::new();
        caches.open("focus-isep-static-v0.9.0").await;
        let mut ctl = controller(fetcher, caches.clone());
        ctl.install().await.unwrap();

        assert!(ctl.handle_message(ControlMessage::SkipWaiting).await.is_none());
        assert_eq!(ctl.state(), WorkerState::Active);
        assert!(!caches.has("focus-isep-static-v0.9.0").await);

        ctl.handle_message(ControlMessage::CacheResources(vec!["/legal.html".to_string()]))
            .await;
        // One bad URL keeps the whole batch out
        ctl.handle_message(ControlMessage::CacheResources(vec![
            "/legal.html".to_string(),
            "/missing.html".to_string(),
        ]))
        .await;

        caches.open("stale").await;
        ctl.handle_message(ControlMessage::ClearCache).await;
        assert!(!caches.has("stale").await);

        let Some(ControlReply::CacheInfo(info)) =
            ctl.handle_message(ControlMessage::GetCacheInfo).await
        else {
            panic!("expected cache info");
        };
        assert_eq!(info["focus-isep-dynamic-v1.0.0"].urls, vec![url("/legal.html")]);
        assert_eq!(info["focus-isep-static-v1.1.0"].size, 3);
    }

    #[tokio::test]
    async fn test_background_sync_refreshes_backend_entries() {
        let (mut ctl, fetcher) = active_controller().await;
        let progress = "https://abc.supabase.co/rest/v1/td_progress?user_id=eq.1";
        let users = "https://abc.supabase.co/rest/v1/users?id=eq.1";
        fetcher.serve(progress, Response::ok("[]", "application/json"));
        fetcher.serve(users, Response::ok("[]", "application/json"));
        fetcher.serve(&url("/legal.html"), Response::ok("<p>v1</p>", "text/html"));
        for u in [progress, users, url("/legal.html").as_str()] {
            respond(&ctl, Request::get(u).unwrap()).await;
        }

        assert!(ctl.set_online(false).await.is_none());
        fetcher.serve(progress, Response::ok(r#"[{"td_number":1}]"#, "application/json"));
        fetcher.serve(users, Response::new(401, ""));
        fetcher.go_online();

        let report = ctl.set_online(true).await.unwrap();
        assert_eq!(report, SyncReport { refreshed: 1, failed: 0 });

        let dynamic = ctl.caches().open("focus-isep-dynamic-v1.0.0").await;
        let synced = dynamic
            .match_request(&Request::get(progress).unwrap())
            .await
            .unwrap();
        assert_eq!(synced.text(), r#"[{"td_number":1}]"#);
        let kept = dynamic.match_request(&Request::get(users).unwrap()).await.unwrap();
        assert_eq!(kept.text(), "[]");

        assert!(ctl.on_sync("other-tag").await.is_none());
        fetcher.go_offline();
        let report = ctl.on_sync(SYNC_TAG).await.unwrap();
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_offline_flag_skips_network() {
        let (mut ctl, fetcher) = active_controller().await;
        fetcher.serve(&url("/js/new.js"), Response::ok("new()", "application/javascript"));
        ctl.set_online(false).await;
        assert!(!ctl.is_online());

        let calls = fetcher.calls();
        let response = respond(&ctl, Request::get(&url("/js/new.js")).unwrap()).await;
        assert_eq!(response.status, 503);
        assert_eq!(fetcher.calls(), calls);

        ctl.set_online(true).await;
        let response = respond(&ctl, Request::get(&url("/js/new.js")).unwrap()).await;
        assert_eq!(response.text(), "new()");
    }

    #[tokio::test]
    async fn test_restore_state_restarts_interrupted_transitions() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let mut ctl = controller(fetcher, CacheStorage::new());
        ctl.restore_state(WorkerState::Installing);
        assert_eq!(ctl.state(), WorkerState::Parsed);
        ctl.restore_state(WorkerState::Active);
        assert_eq!(ctl.state(), WorkerState::Active);
        assert!(ctl.clients_claimed());
        assert!(ctl.install().await.is_err());
    }
}
