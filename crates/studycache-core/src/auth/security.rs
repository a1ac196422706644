//! Input validation, sanitisation and login rate limiting.
//!
//! Validation happens before any network call. Rejected input never reaches
//! the record store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::warn;

use crate::config::SecurityConfig;

/// Minimum username length
const MIN_USERNAME_LENGTH: usize = 3;

/// Accepted unit numbers
const MIN_UNIT_NUMBER: i64 = 1;
const MAX_UNIT_NUMBER: i64 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid input")]
    Empty,

    #[error("Invalid username format")]
    InvalidUsername,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Invalid unit number: {0}")]
    InvalidUnitNumber(String),

    #[error("Invalid unit type")]
    InvalidUnitType,
}

/// HTML-escape characters that could inject markup.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            other => out.push(other),
        }
    }
    out
}

fn is_identifier(s: &str, max_len: usize) -> bool {
    let len = s.chars().count();
    (MIN_USERNAME_LENGTH..=max_len).contains(&len)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Trimmed username of 3..=max_len characters from `[A-Za-z0-9_-]`.
pub fn validate_username(input: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !is_identifier(trimmed, max_len) {
        return Err(ValidationError::InvalidUsername);
    }
    Ok(trimmed.to_string())
}

/// Characters that would break a store filter expression.
const EMAIL_FORBIDDEN: &[char] = &[',', '(', ')', '"', '\\'];

/// Trimmed email shaped like `local@domain.tld`, no whitespace, one `@`.
pub fn validate_email(input: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.len() > max_len
        || trimmed
            .chars()
            .any(|c| c.is_whitespace() || EMAIL_FORBIDDEN.contains(&c))
    {
        return Err(ValidationError::InvalidEmail);
    }

    let mut parts = trimmed.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::InvalidEmail);
    };
    if local.is_empty() {
        return Err(ValidationError::InvalidEmail);
    }
    // Needs a dot with something on both sides
    let has_dotted_domain = domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
    if !has_dotted_domain {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(trimmed.to_string())
}

pub fn validate_unit_number(number: i64) -> Result<i64, ValidationError> {
    if (MIN_UNIT_NUMBER..=MAX_UNIT_NUMBER).contains(&number) {
        Ok(number)
    } else {
        Err(ValidationError::InvalidUnitNumber(number.to_string()))
    }
}

pub fn parse_unit_number(input: &str) -> Result<i64, ValidationError> {
    let number = input
        .trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidUnitNumber(input.to_string()))?;
    validate_unit_number(number)
}

/// Unit types follow the username pattern.
pub fn validate_unit_type(input: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if !is_identifier(trimmed, max_len) {
        return Err(ValidationError::InvalidUnitType);
    }
    Ok(trimmed.to_string())
}

/// Record a security-relevant event. Store failures and tampering attempts
/// are logged the same way.
pub fn log_suspicious_activity(identifier: &str, activity: &str) {
    warn!(target: "security", identifier = identifier, activity = activity, "Suspicious activity detected");
}

/// Sliding-window attempt counter keyed by identifier and action. The
/// attempt log can be saved and restored so the window spans processes.
#[derive(Debug)]
pub struct RateLimiter {
    max_attempts: usize,
    window: Duration,
    attempts: BTreeMap<String, Vec<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        let window = i64::try_from(config.window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self::new(config.login_attempts, window)
    }

    /// Returns false when `identifier` already used its attempts for `action`.
    pub fn check(&mut self, identifier: &str, action: &str) -> bool {
        self.check_at(identifier, action, Utc::now())
    }

    pub fn check_at(&mut self, identifier: &str, action: &str, now: DateTime<Utc>) -> bool {
        let key = format!("{}_{}", identifier, action);
        let window = self.window;
        let recent = self.attempts.entry(key).or_default();
        recent.retain(|t| now - *t < window);

        if recent.len() >= self.max_attempts {
            log_suspicious_activity(identifier, &format!("Rate limit exceeded for {}", action));
            return false;
        }

        recent.push(now);
        true
    }

    /// Replace the attempt log with a saved one.
    pub fn restore(&mut self, saved: &str) -> serde_json::Result<()> {
        self.attempts = serde_json::from_str(saved)?;
        Ok(())
    }

    /// The attempt log as JSON, without identifiers whose window is empty.
    pub fn snapshot(&self, now: DateTime<Utc>) -> serde_json::Result<String> {
        let live: BTreeMap<&String, Vec<&DateTime<Utc>>> = self
            .attempts
            .iter()
            .map(|(key, times)| (key, times.iter().filter(|t| now - **t < self.window).collect::<Vec<_>>()))
            .filter(|(_, times)| !times.is_empty())
            .collect();
        serde_json::to_string(&live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  alice_01 ", 50).unwrap(), "alice_01");
        assert_eq!(validate_username("a-b", 50).unwrap(), "a-b");
        assert_eq!(validate_username("", 50), Err(ValidationError::Empty));
        assert_eq!(validate_username("ab", 50), Err(ValidationError::InvalidUsername));
        assert_eq!(validate_username("bad name", 50), Err(ValidationError::InvalidUsername));
        assert_eq!(validate_username("<script>", 50), Err(ValidationError::InvalidUsername));
        assert_eq!(validate_username(&"x".repeat(51), 50), Err(ValidationError::InvalidUsername));
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("alice@isep.fr", 255).is_ok());
        assert!(validate_email("a.b@sub.domain.org", 255).is_ok());
        assert!(validate_email("alice@isep", 255).is_err());
        assert!(validate_email("alice@.fr", 255).is_err());
        assert!(validate_email("alice@isep.", 255).is_err());
        assert!(validate_email("@isep.fr", 255).is_err());
        assert!(validate_email("a@b@isep.fr", 255).is_err());
        assert!(validate_email("al ice@isep.fr", 255).is_err());
        assert!(validate_email("a@b.co", 5).is_err());
        assert_eq!(validate_email("a,b@isep.fr", 255), Err(ValidationError::InvalidEmail));
        assert_eq!(validate_email("a)b@isep.fr", 255), Err(ValidationError::InvalidEmail));
        assert_eq!(validate_email("ab@isep.fr)", 255), Err(ValidationError::InvalidEmail));
    }

    #[test]
    fn test_unit_identifiers() {
        assert_eq!(parse_unit_number("3"), Ok(3));
        assert_eq!(parse_unit_number(" 10 "), Ok(10));
        assert!(parse_unit_number("0").is_err());
        assert!(parse_unit_number("11").is_err());
        assert!(parse_unit_number("3.5").is_err());
        assert!(parse_unit_number("abc").is_err());

        assert_eq!(validate_unit_type("proba", 50), Ok("proba".to_string()));
        assert_eq!(validate_unit_type("pr", 50), Err(ValidationError::InvalidUnitType));
        assert_eq!(validate_unit_type("pro ba", 50), Err(ValidationError::InvalidUnitType));
        assert_eq!(validate_unit_type("probabilites", 8), Err(ValidationError::InvalidUnitType));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(
            sanitize(r#"<a href="/x">'hi'</a>"#),
            "&lt;a href=&quot;&#x2F;x&quot;&gt;&#x27;hi&#x27;&lt;&#x2F;a&gt;"
        );
        assert_eq!(sanitize("plain text"), "plain text");
    }

    #[test]
    fn test_rate_limiter_sliding_window() {
        let mut limiter = RateLimiter::new(5, Duration::seconds(900));
        let start = Utc::now();

        for i in 0..5 {
            assert!(limiter.check_at("a@x.io", "login", start + Duration::seconds(i)));
        }
        assert!(!limiter.check_at("a@x.io", "login", start + Duration::seconds(10)));

        // Other identifiers and actions have their own windows
        assert!(limiter.check_at("b@x.io", "login", start + Duration::seconds(10)));
        assert!(limiter.check_at("a@x.io", "subscribe", start + Duration::seconds(10)));

        // Once the first attempt leaves the window one slot frees up
        assert!(limiter.check_at("a@x.io", "login", start + Duration::seconds(900)));
        assert!(!limiter.check_at("a@x.io", "login", start + Duration::seconds(900)));
    }

    #[test]
    fn test_rate_limiter_restores_saved_attempts() {
        let start = Utc::now();
        let mut first = RateLimiter::new(2, Duration::seconds(900));
        assert!(first.check_at("a@x.io", "login", start));
        assert!(first.check_at("a@x.io", "login", start));
        let saved = first.snapshot(start).unwrap();

        let mut second = RateLimiter::new(2, Duration::seconds(900));
        second.restore(&saved).unwrap();
        assert!(!second.check_at("a@x.io", "login", start + Duration::seconds(1)));

        // Expired attempts are left out of the snapshot
        assert_eq!(first.snapshot(start + Duration::seconds(900)).unwrap(), "{}");
        assert!(second.restore("not json").is_err());
    }
}
