//! Authentication module for the study site.
//!
//! This module provides:
//! - `AuthManager`: username + email login against the record store, with
//!   the current user saved to local storage between runs
//! - `CredentialStore`: OS keychain storage for the record store API key
//! - `security`: input validation, sanitisation and login rate limiting

pub mod credentials;
pub mod security;
pub mod session;

pub use credentials::CredentialStore;
pub use security::{RateLimiter, ValidationError};
pub use session::{AuthError, AuthManager};
