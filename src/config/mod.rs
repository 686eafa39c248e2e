//! Configuration module for Video-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use video_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Polling every {}s", config.schedule.interval_secs);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{Config, ScheduleConfig, ServerConfig, StorageConfig, UpstreamConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{validate_query, MAX_QUERY_LEN};
