//! Shared helpers.

pub mod progress;
pub mod time;
