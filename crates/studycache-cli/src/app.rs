use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use studycache_core::auth::CredentialStore;
use studycache_core::models::ACHIEVEMENTS;
use studycache_core::notify::drain;
use studycache_core::offline::{
    notification_click, render_push, CacheController, CacheStorage, Classifier, ControlMessage,
    ControlReply, Destination, FetchOutcome, HttpFetcher, Request, WindowAction, WorkerState,
    SYNC_TAG,
};
use studycache_core::storage::LocalStorage;
use studycache_core::store::{RecordStore, RestStore};
use studycache_core::utils::{format_percent, format_timestamp, truncate_string};
use studycache_core::{AppEvent, Config, NotificationKind, Notifier, StudyApp};

use crate::commands::{CacheCommand, Command, KeyCommand, MusicCommand, USAGE};

/// Local storage key of the saved controller state
const WORKER_KEY: &str = "offlineWorker";

/// Sub-directory of the cache dir holding partition snapshots
const OFFLINE_DIR: &str = "offline";

/// Body preview length for `cache get`
const BODY_PREVIEW_CHARS: usize = 400;

/// Controller state saved between runs. Partition names are kept so a
/// release that renames them starts the lifecycle over.
#[derive(Debug, Serialize, Deserialize)]
struct SavedWorker {
    partitions: Vec<String>,
    state: WorkerState,
    online: bool,
}

pub struct App {
    config: Config,
    cache_dir: PathBuf,
    storage: LocalStorage,
    study: StudyApp,
    events: mpsc::UnboundedReceiver<AppEvent>,
    controller: CacheController,
}

impl App {
    pub async fn new(config: Config, cache_dir: PathBuf) -> Result<Self> {
        let storage = LocalStorage::open(cache_dir.clone())?;

        let api_key = Self::resolve_api_key(&config);
        let store: Arc<dyn RecordStore> = Arc::new(
            RestStore::new(&config.store_url, &api_key).context("Failed to create store client")?,
        );

        let (notifier, events) = Notifier::channel();
        let study = StudyApp::new(store, storage.clone(), notifier, config.security.clone()).await;

        let classifier = Classifier::new(
            config.origin_url()?,
            &config.cache.manifest,
            &config.backend_host()?,
        )?;
        let caches = CacheStorage::load_from(&cache_dir.join(OFFLINE_DIR)).await?;
        let fetcher = Arc::new(HttpFetcher::new()?);
        let mut controller = CacheController::new(config.cache.clone(), classifier, caches, fetcher);
        Self::restore_worker(&storage, &config, &mut controller).await;

        Ok(Self {
            config,
            cache_dir,
            storage,
            study,
            events,
            controller,
        })
    }

    /// Environment or config first, then the OS keychain.
    fn resolve_api_key(config: &Config) -> String {
        if let Some(ref key) = config.store_key {
            return key.clone();
        }
        match CredentialStore::get_key(&config.store_url) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "No API key in keychain");
                warn!("No store API key configured; requests will be anonymous");
                String::new()
            }
        }
    }

    async fn restore_worker(storage: &LocalStorage, config: &Config, controller: &mut CacheController) {
        let Some(saved) = storage.get(WORKER_KEY).await else {
            return;
        };
        match serde_json::from_str::<SavedWorker>(&saved) {
            Ok(saved) if saved.partitions == config.cache.current_names() => {
                controller.restore_state(saved.state);
                controller.restore_online(saved.online);
            }
            Ok(_) => info!("Cache partitions renamed, offline cache must be reinstalled"),
            Err(e) => warn!(error = %e, "Ignoring unreadable controller state"),
        }
    }

    async fn save_worker(&self) -> Result<()> {
        let saved = SavedWorker {
            partitions: self
                .config
                .cache
                .current_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            state: self.controller.state(),
            online: self.controller.is_online(),
        };
        self.storage
            .set(WORKER_KEY, &serde_json::to_string(&saved)?)
            .await?;
        self.controller
            .caches()
            .persist_to(&self.cache_dir.join(OFFLINE_DIR))
            .await
    }

    /// Run one command. Pending notifications are printed even when it fails.
    pub async fn run(&mut self, command: Command) -> Result<()> {
        self.study.init().await;
        let result = self.execute(command).await;
        self.print_events();
        result
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Help => print!("{}", USAGE),
            Command::Login { username, email } => {
                if self.study.login(&username, &email).await.is_ok() {
                    self.config.last_username = Some(username);
                    if let Err(e) = self.config.save() {
                        warn!(error = %e, "Failed to save config");
                    }
                }
            }
            Command::Logout => self.study.logout().await,
            Command::WhoAmI => match self.study.current_user() {
                Some(user) => {
                    println!("{} <{}>", user.username, user.email);
                    println!("  id:         {}", user.id);
                    println!("  last login: {}", format_timestamp(user.last_login.as_ref()));
                }
                None => println!("Not logged in"),
            },
            Command::Visit {
                unit_type,
                unit_number,
            } => {
                match self.study.tracker.record_access(unit_number, &unit_type) {
                    Some(handle) => {
                        // The upsert runs in the background; wait so it is not cut off at exit
                        if let Err(e) = handle.await {
                            warn!(error = %e, "Access update task failed");
                        }
                        println!("Opened {} {}", unit_type, unit_number);
                    }
                    None if self.study.current_user().is_none() => {
                        println!("Not logged in; visit not recorded")
                    }
                    None => bail!("Invalid unit: {} {}", unit_type, unit_number),
                }
            }
            Command::Complete {
                unit_type,
                unit_number,
                score,
                time_spent,
            } => {
                let saved = self
                    .study
                    .tracker
                    .mark_completed(unit_number, &unit_type, score, time_spent)
                    .await
                    .with_context(|| format!("Invalid unit: {} {}", unit_type, unit_number))?;
                if !saved {
                    bail!("Completion of {} {} was not saved", unit_type, unit_number);
                }
            }
            Command::Progress => self.print_progress(),
            Command::Badges => self.print_badges(),
            Command::Subscribe { email } => {
                self.study.subscribe_newsletter(&email).await;
            }
            Command::Stats => match self.study.user_count().await {
                Some(count) => println!("{} registered users", count),
                None => println!("User count unavailable"),
            },
            Command::Music(cmd) => self.run_music(cmd).await,
            Command::Key(cmd) => self.run_key(cmd)?,
            Command::Cache(cmd) => self.run_cache(cmd).await?,
            Command::Push { payload } => match render_push(payload.as_deref().map(str::as_bytes)) {
                Some(spec) => println!("{}", serde_json::to_string_pretty(&spec)?),
                None => println!("Empty push, nothing shown"),
            },
            Command::Click { action, windows } => match notification_click(&action, &windows) {
                Some(WindowAction::Focus(url)) => println!("Focus window {}", url),
                Some(WindowAction::Open(url)) => println!("Open window {}", url),
                None => println!("Notification closed"),
            },
        }
        Ok(())
    }

    fn print_progress(&self) {
        let Some(user) = self.study.tracker.user() else {
            println!("Not logged in");
            return;
        };
        let aggregate = self.study.tracker.compute_aggregate();
        println!(
            "{}: {}/{} units ({})",
            user.username,
            aggregate.completed,
            aggregate.total,
            format_percent(aggregate.percent)
        );

        let mut records: Vec<_> = self.study.tracker.progress().values().collect();
        records.sort_by(|a, b| {
            a.unit_type
                .cmp(&b.unit_type)
                .then(a.unit_number.cmp(&b.unit_number))
        });
        for record in records {
            let mark = if record.is_completed { "x" } else { " " };
            let score = record
                .score
                .map(|s| format!("{:.0}", s))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  [{}] {} {:<2} score {:>3}  completed {}  last seen {}",
                mark,
                record.unit_type,
                record.unit_number,
                score,
                format_timestamp(record.completed_at.as_ref()),
                format_timestamp(record.last_accessed.as_ref())
            );
        }
    }

    fn print_badges(&self) {
        let book = self.study.tracker.achievements();
        for achievement in ACHIEVEMENTS {
            let mark = if book.is_earned(achievement.key) { "*" } else { " " };
            println!(
                "  [{}] {:<20} {}",
                mark, achievement.title, achievement.description
            );
        }
    }

    async fn run_music(&mut self, cmd: MusicCommand) {
        let player = &mut self.study.music;
        match cmd {
            MusicCommand::Status => {}
            MusicCommand::Play => player.play(),
            MusicCommand::Pause => player.pause(),
            MusicCommand::Toggle => {
                player.toggle();
            }
            MusicCommand::Volume(v) => player.set_volume(v),
        }
        player.save_state().await;
        println!(
            "Music {} at {:.0}%",
            if player.is_playing() { "playing" } else { "paused" },
            player.volume() * 100.0
        );
    }

    fn run_key(&self, cmd: KeyCommand) -> Result<()> {
        match cmd {
            KeyCommand::Set(key) => {
                CredentialStore::store(&self.config.store_url, &key)?;
                println!("API key saved to the keychain");
            }
            KeyCommand::Delete => {
                CredentialStore::delete(&self.config.store_url)?;
                println!("API key removed from the keychain");
            }
        }
        Ok(())
    }

    async fn run_cache(&mut self, cmd: CacheCommand) -> Result<()> {
        match cmd {
            CacheCommand::Install => {
                self.controller.install().await?;
                println!("Installed {} resources", self.controller.classifier().manifest().len());
                if self.controller.skip_waiting_requested() {
                    self.activate().await?;
                }
            }
            CacheCommand::Activate => self.activate().await?,
            CacheCommand::Info => {
                let reply = self.controller.handle_message(ControlMessage::GetCacheInfo).await;
                if let Some(ControlReply::CacheInfo(info)) = reply {
                    println!("Controller {}", self.controller.state());
                    for (name, partition) in info {
                        println!("{} ({} entries)", name, partition.size);
                        let cache = self.controller.caches().open(&name).await;
                        for entry in cache.entries().await {
                            println!("  {}  {}", entry.age_display(), entry.url);
                        }
                    }
                }
            }
            CacheCommand::Clear => {
                self.controller.handle_message(ControlMessage::ClearCache).await;
                println!("Old partitions cleared");
            }
            CacheCommand::Sync => match self.controller.on_sync(SYNC_TAG).await {
                Some(report) => println!(
                    "Refreshed {}, failed {}",
                    report.refreshed, report.failed
                ),
                None => println!("Nothing to sync"),
            },
            CacheCommand::Add(urls) => {
                let count = self.controller.cache_additional_resources(&urls).await?;
                println!("Cached {} resources", count);
            }
            CacheCommand::Get { url, document } => {
                let url = self.controller.classifier().resolve(&url)?;
                let mut request = Request::get_url(url);
                if document {
                    request = request.with_destination(Destination::Document);
                }
                match self.controller.handle_fetch(&request).await {
                    FetchOutcome::Respond(response) => {
                        println!("{} {}", response.status, response.status_text);
                        for (name, value) in &response.headers {
                            println!("{}: {}", name, value);
                        }
                        println!();
                        println!("{}", truncate_string(&response.text(), BODY_PREVIEW_CHARS));
                    }
                    FetchOutcome::Passthrough => {
                        println!("Not intercepted (controller {})", self.controller.state());
                    }
                }
            }
            CacheCommand::Online(online) => {
                if let Some(report) = self.controller.set_online(online).await {
                    println!(
                        "Back online: refreshed {}, failed {}",
                        report.refreshed, report.failed
                    );
                } else {
                    println!("{}", if online { "Online" } else { "Offline" });
                }
            }
        }

        self.save_worker().await
    }

    async fn activate(&mut self) -> Result<()> {
        let deleted = self.controller.activate().await?;
        for name in &deleted {
            println!("Deleted old partition {}", name);
        }
        println!("Offline cache active");
        Ok(())
    }

    fn print_events(&mut self) {
        for event in drain(&mut self.events) {
            match event {
                AppEvent::Notify { kind, message } => {
                    let tag = match kind {
                        NotificationKind::Success => "ok",
                        NotificationKind::Error => "error",
                        NotificationKind::Info => "info",
                    };
                    println!("[{}] {}", tag, message);
                }
                AppEvent::ProgressChanged {
                    completed,
                    total,
                    percent,
                } => println!("Progress: {}/{} ({})", completed, total, format_percent(percent)),
                AppEvent::AchievementUnlocked { title, .. } => {
                    println!("Achievement unlocked: {}", title)
                }
                AppEvent::Welcome { username } => {
                    println!("Welcome to Focus ISEP, {}! A confirmation email is on its way.", username)
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use studycache_core::models::User;
    use studycache_core::storage::keys;

    async fn app(dir: &tempfile::TempDir) -> App {
        let config = Config {
            // Nothing listens here; store calls fail fast
            store_url: "http://127.0.0.1:9".to_string(),
            store_key: Some("test-key".to_string()),
            ..Config::default()
        };
        App::new(config, dir.path().to_path_buf()).await.unwrap()
    }

    fn complete(unit_type: &str, unit_number: i64) -> Command {
        Command::Complete {
            unit_type: unit_type.to_string(),
            unit_number,
            score: None,
            time_spent: None,
        }
    }

    #[tokio::test]
    async fn test_unsaved_completion_fails_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir).await;
        assert!(app.run(complete("proba", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_unit_fails_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir).await;
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@isep.fr".to_string(),
            created_at: None,
            last_login: None,
        };
        app.storage
            .set(keys::USER, &serde_json::to_string(&user).unwrap())
            .await
            .unwrap();

        let err = app.run(complete("<b>", 1)).await.unwrap_err();
        assert!(err.to_string().contains("Invalid unit"));
        let visit = Command::Visit {
            unit_type: "proba".to_string(),
            unit_number: 42,
        };
        assert!(app.run(visit).await.is_err());
    }
}
