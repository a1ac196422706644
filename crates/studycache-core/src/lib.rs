//! Core library for studycache.
//!
//! Two subsystems live here:
//!
//! - [`offline`]: the offline cache controller. It classifies outgoing GET
//!   requests, applies a cache-first or network-first strategy per resource
//!   class and manages versioned cache partitions.
//! - [`progress`]: per-user unit completion tracking backed by an external
//!   record store, aggregate progress and achievement unlocks.
//!
//! Supporting modules provide the record-store client ([`store`]), local
//! durable storage ([`storage`]), login and input validation ([`auth`]), the
//! newsletter, music-player state and the front-end event dispatch table.

pub mod app;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod models;
pub mod music;
pub mod newsletter;
pub mod notify;
pub mod offline;
pub mod progress;
pub mod storage;
pub mod store;
pub mod utils;

pub use app::StudyApp;
pub use config::Config;
pub use notify::{AppEvent, NotificationKind, Notifier};
