//! Progress and achievement tracking.
//!
//! `ProgressTracker` owns the current user's unit completion map and the
//! earned-achievement set. Every completion is upserted to the record store,
//! folded into the map and followed by an achievement evaluation.

pub mod achievements;
pub mod tracker;

pub use achievements::{AchievementBook, CategoryCounts};
pub use tracker::{aggregate, Aggregate, ProgressTracker};
