//! Output module for operator-facing reports
//!
//! This module handles printing ingestion statistics for the `--stats`
//! command.

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics, QueryStatistics};
