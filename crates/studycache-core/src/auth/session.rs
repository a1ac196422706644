use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::SecurityConfig;
use crate::models::{NewUser, User};
use crate::notify::{AppEvent, Notifier};
use crate::storage::{keys, LocalStorage};
use crate::store::{collections, from_row, to_row, Query, RecordStore, StoreError};

use super::security::{validate_email, validate_username, RateLimiter, ValidationError};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Too many login attempts. Please try again later.")]
    RateLimited,

    #[error("{0}")]
    Store(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Store(err.login_message())
    }
}

/// Login state for one person. Owns the saved-user entry in local storage.
pub struct AuthManager {
    store: Arc<dyn RecordStore>,
    storage: LocalStorage,
    notifier: Notifier,
    limiter: RateLimiter,
    security: SecurityConfig,
    current_user: Option<User>,
}

impl AuthManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        storage: LocalStorage,
        notifier: Notifier,
        security: SecurityConfig,
    ) -> Self {
        Self {
            store,
            storage,
            notifier,
            limiter: RateLimiter::from_config(&security),
            security,
            current_user: None,
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.current_user.is_some()
    }

    /// Rehydrate the saved user. Unparsable data is discarded.
    pub async fn restore(&mut self) -> Option<User> {
        let saved = self.storage.get(keys::USER).await?;
        match serde_json::from_str::<User>(&saved) {
            Ok(user) => {
                debug!(user_id = %user.id, "Restored saved user");
                self.current_user = Some(user.clone());
                Some(user)
            }
            Err(e) => {
                error!(error = %e, "Failed to parse saved user");
                if let Err(e) = self.storage.remove(keys::USER).await {
                    warn!(error = %e, "Failed to remove saved user");
                }
                None
            }
        }
    }

    /// Log in with a username and email, creating the account on first use.
    pub async fn login(&mut self, username: &str, email: &str) -> Result<User, AuthError> {
        let username = validate_username(username, self.security.max_username_length)?;
        let email = validate_email(email, self.security.max_email_length)?;

        self.load_attempts().await;
        let allowed = self.limiter.check(&email, "login");
        self.save_attempts().await;
        if !allowed {
            return Err(AuthError::RateLimited);
        }

        info!(username = %username, "Login attempt");

        let query = Query::new().any_eq(&[
            ("username", Value::String(username.clone())),
            ("email", Value::String(email.clone())),
        ]);
        let existing = self
            .store
            .select(collections::USERS, &query)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up user");
                AuthError::from(e)
            })?
            .into_iter()
            .next();

        let user: User = match existing {
            Some(row) => {
                let mut user: User = from_row(row)?;
                let now = Utc::now();
                let changes = to_row(&json!({ "last_login": now }))?;
                match self
                    .store
                    .update(collections::USERS, &Query::new().eq("id", user.id.clone()), changes)
                    .await
                {
                    Ok(_) => user.last_login = Some(now),
                    Err(e) => warn!(error = %e, "Failed to update last_login"),
                }
                debug!(user_id = %user.id, "Existing user found");
                user
            }
            None => {
                let row = to_row(&NewUser::new(&username, &email))?;
                let inserted = self
                    .store
                    .insert(collections::USERS, row)
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Failed to create user");
                        AuthError::from(e)
                    })?;
                let user: User = from_row(inserted)?;
                info!(user_id = %user.id, "Created new user");
                self.notifier.emit(AppEvent::Welcome {
                    username: user.username.clone(),
                });
                user
            }
        };

        self.save_user(&user).await;
        self.current_user = Some(user.clone());
        Ok(user)
    }

    pub async fn logout(&mut self) {
        self.current_user = None;
        if let Err(e) = self.storage.remove(keys::USER).await {
            warn!(error = %e, "Failed to remove saved user");
        }
        self.notifier.info("Logged out");
    }

    /// Total registered users, for the stats panel.
    pub async fn user_count(&self) -> Option<u64> {
        match self.store.count(collections::USERS).await {
            Ok(count) => Some(count),
            Err(e) if e.is_missing_relation() => {
                warn!("Users collection not found for stats");
                None
            }
            Err(e) => {
                error!(error = %e, "Failed to count users");
                None
            }
        }
    }

    /// Pick up attempts recorded by earlier runs.
    async fn load_attempts(&mut self) {
        let Some(saved) = self.storage.get(keys::LOGIN_ATTEMPTS).await else {
            return;
        };
        if let Err(e) = self.limiter.restore(&saved) {
            warn!(error = %e, "Discarding unreadable login attempts");
        }
    }

    async fn save_attempts(&self) {
        let saved = match self.limiter.snapshot(Utc::now()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to serialize login attempts");
                return;
            }
        };
        if let Err(e) = self.storage.set(keys::LOGIN_ATTEMPTS, &saved).await {
            warn!(error = %e, "Failed to save login attempts");
        }
    }

    async fn save_user(&self, user: &User) {
        let saved = match serde_json::to_string(user) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to serialize user");
                return;
            }
        };
        if let Err(e) = self.storage.set(keys::USER, &saved).await {
            warn!(error = %e, "Failed to save user locally");
        }
    }
}
