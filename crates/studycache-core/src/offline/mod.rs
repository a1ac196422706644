//! Offline cache controller.
//!
//! Makes a fixed manifest of static assets available offline and
//! opportunistically caches images, API responses and HTML pages:
//!
//! - Static assets and images are served cache-first.
//! - API calls and everything else are network-first with a cache fallback.
//! - Only `GET` requests are intercepted and only `200` responses are stored.
//! - Activation deletes every partition not named by the current release.
//!
//! The page talks to the controller through [`ControlMessage`]s and receives
//! push notifications rendered by [`push`].

pub mod classify;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod http;
pub mod messages;
pub mod push;
pub mod storage;

pub use classify::{Classifier, ResourceClass};
pub use controller::{CacheController, FetchOutcome, SyncReport, WorkerState, SYNC_TAG};
pub use error::CacheError;
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use http::{Destination, Request, Response};
pub use messages::{ControlMessage, ControlReply, PartitionInfo};
pub use push::{notification_click, render_push, NotificationSpec, WindowAction};
pub use storage::{Cache, CacheStorage, CachedResponse};
