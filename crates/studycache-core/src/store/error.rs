use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - check the store API key ({0})")]
    Unauthorized(String),

    #[error("Relation does not exist: {0}")]
    MissingRelation(String),

    #[error("Duplicate record: {0}")]
    UniqueViolation(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Postgres unique-violation code
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres undefined-table code
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Deserialize)]
struct BackendError {
    code: Option<String>,
    message: Option<String>,
}

impl StoreError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        let parsed: Option<BackendError> = serde_json::from_str(body).ok();
        let code = parsed.as_ref().and_then(|e| e.code.as_deref());
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| truncated.clone());

        if code == Some(UNIQUE_VIOLATION) {
            return StoreError::UniqueViolation(message);
        }
        if code == Some(UNDEFINED_TABLE) || message.contains("does not exist") {
            return StoreError::MissingRelation(message);
        }
        if message.contains("JWT") {
            return StoreError::Unauthorized(message);
        }

        match status.as_u16() {
            401 => StoreError::Unauthorized(message),
            403 => StoreError::AccessDenied(message),
            409 => StoreError::UniqueViolation(message),
            429 => StoreError::RateLimited,
            500..=599 => StoreError::ServerError(message),
            _ => StoreError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_missing_relation(&self) -> bool {
        matches!(self, StoreError::MissingRelation(_))
    }

    /// Message suitable for showing to the person logging in.
    pub fn login_message(&self) -> String {
        match self {
            StoreError::UniqueViolation(_) => "This username or email is already in use".to_string(),
            StoreError::Unauthorized(_) => "Record store configuration error".to_string(),
            StoreError::MissingRelation(_) => {
                "Database not configured. Contact the administrator.".to_string()
            }
            other => other.to_string(),
        }
    }
}
