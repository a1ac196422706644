use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

/// Insert payload for a first login; the store assigns the id.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl NewUser {
    pub fn new(username: &str, email: &str) -> Self {
        let now = Utc::now();
        Self {
            username: username.to_string(),
            email: email.to_string(),
            created_at: now,
            last_login: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterSubscription {
    pub email: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    pub is_active: bool,
}
