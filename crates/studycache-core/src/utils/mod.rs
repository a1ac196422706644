//! Utility functions for display formatting.

pub mod format;

pub use format::{format_age, format_percent, format_timestamp, truncate_string};
