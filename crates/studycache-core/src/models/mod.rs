//! Data models for the study site.
//!
//! - `User`, `NewsletterSubscription`: account and mailing-list records
//! - `UserProgressRecord`: one row per (user, unit number, unit type)
//! - `AchievementDefinition`: the static badge catalog

pub mod achievement;
pub mod progress;
pub mod user;

pub use achievement::{AchievementDefinition, Category, Requirement, ACHIEVEMENTS};
pub use progress::{
    progress_key, AccessUpdate, CompletionUpsert, ProgressMap, UserProgressRecord, TOTAL_UNITS,
};
pub use user::{NewUser, NewsletterSubscription, User};
