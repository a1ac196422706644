//! Application state tying login, progress and the side features together.

use std::sync::Arc;

use tracing::{debug, info};

use crate::auth::{AuthError, AuthManager};
use crate::config::SecurityConfig;
use crate::models::User;
use crate::music::MusicPlayer;
use crate::newsletter::{Newsletter, NewsletterError};
use crate::notify::Notifier;
use crate::progress::{AchievementBook, ProgressTracker};
use crate::storage::LocalStorage;
use crate::store::RecordStore;

pub struct StudyApp {
    pub auth: AuthManager,
    pub tracker: ProgressTracker,
    pub newsletter: Newsletter,
    pub music: MusicPlayer,
    notifier: Notifier,
}

impl StudyApp {
    pub async fn new(
        store: Arc<dyn RecordStore>,
        storage: LocalStorage,
        notifier: Notifier,
        security: SecurityConfig,
    ) -> Self {
        let achievements = AchievementBook::new(storage.clone());
        let music = MusicPlayer::load(storage.clone()).await;
        Self {
            tracker: ProgressTracker::new(Arc::clone(&store), notifier.clone(), achievements, &security),
            newsletter: Newsletter::new(Arc::clone(&store), security.max_email_length),
            auth: AuthManager::new(store, storage, notifier.clone(), security),
            music,
            notifier,
        }
    }

    /// Resume the saved session, if any, and load its progress.
    pub async fn init(&mut self) -> Option<User> {
        let user = self.auth.restore().await?;
        self.tracker.start_session(user.clone()).await;
        self.tracker.load_user_progress().await;
        debug!(user_id = %user.id, "Session resumed");
        Some(user)
    }

    pub fn current_user(&self) -> Option<&User> {
        self.auth.current_user()
    }

    /// Log in and start a progress session. Failures are also reported as
    /// an error notification.
    pub async fn login(&mut self, username: &str, email: &str) -> Result<User, AuthError> {
        let user = match self.auth.login(username, email).await {
            Ok(user) => user,
            Err(e) => {
                self.notifier.error(e.to_string());
                return Err(e);
            }
        };

        self.tracker.start_session(user.clone()).await;
        self.tracker.load_user_progress().await;
        self.notifier.success(format!("Welcome {}!", user.username));
        info!(user_id = %user.id, "Logged in");
        Ok(user)
    }

    pub async fn logout(&mut self) {
        self.tracker.end_session();
        self.auth.logout().await;
    }

    /// Subscribe to the newsletter, linked to the logged-in user if there is
    /// one. Returns whether a subscription was created.
    pub async fn subscribe_newsletter(&self, email: &str) -> bool {
        let user_id = self.auth.current_user().map(|u| u.id.as_str());
        match self.newsletter.subscribe(email, user_id).await {
            Ok(_) => {
                self.notifier.success("Thanks for subscribing to the newsletter!");
                true
            }
            Err(NewsletterError::Store(_)) => {
                self.notifier.error("Subscription failed. Please try again later.");
                false
            }
            Err(e) => {
                self.notifier.error(e.to_string());
                false
            }
        }
    }

    pub async fn user_count(&self) -> Option<u64> {
        self.auth.user_count().await
    }
}
