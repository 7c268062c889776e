//! Output module for session reports
//!
//! This module reads what a session left in the database (access records,
//! documents, queued entries) and renders it for the `--stats` mode.

pub mod stats;

pub use stats::{load_statistics, print_statistics, SessionStatistics};
