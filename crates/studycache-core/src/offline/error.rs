use thiserror::Error;

use super::fetch::FetchError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },
}
