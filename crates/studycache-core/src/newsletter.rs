//! Newsletter subscriptions.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use crate::auth::security::{validate_email, ValidationError};
use crate::models::NewsletterSubscription;
use crate::store::{collections, from_row, to_row, Query, RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum NewsletterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("You are already subscribed to the newsletter")]
    AlreadySubscribed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Newsletter {
    store: Arc<dyn RecordStore>,
    max_email_length: usize,
}

impl Newsletter {
    pub fn new(store: Arc<dyn RecordStore>, max_email_length: usize) -> Self {
        Self {
            store,
            max_email_length,
        }
    }

    /// Subscribe `email`, optionally linked to a logged-in user.
    pub async fn subscribe(
        &self,
        email: &str,
        user_id: Option<&str>,
    ) -> Result<NewsletterSubscription, NewsletterError> {
        let email = validate_email(email, self.max_email_length)?;

        let active = Query::new().eq("email", email.clone()).eq("is_active", true);
        let existing = self
            .store
            .select(collections::NEWSLETTER, &active)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to check newsletter subscription");
                e
            })?;
        if !existing.is_empty() {
            return Err(NewsletterError::AlreadySubscribed);
        }

        let subscription = NewsletterSubscription {
            email,
            user_id: user_id.map(|s| s.to_string()),
            subscribed_at: Utc::now(),
            is_active: true,
        };
        let stored = self
            .store
            .insert(collections::NEWSLETTER, to_row(&subscription)?)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to subscribe to newsletter");
                e
            })?;

        info!("Newsletter subscription created");
        Ok(from_row(stored)?)
    }
}
