//! Storage module for persisting ingestion state
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Ingested items and the uniqueness constraint backing deduplication
//! - The durable key-value cache holding cursors and the credential index
//! - Schedule registrations
//! - The fetch run log

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::HarvestError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between the scheduler, fetch cycles and the read API
///
/// The lock is only ever held for the duration of a single storage call and
/// never across an `.await`.
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) the database at `path` and wraps it for sharing
pub fn open_storage(path: &Path) -> Result<SharedStorage, HarvestError> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Wraps an already opened storage for sharing
pub fn share(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks the shared storage, mapping poisoning to a harvest error
pub fn lock(storage: &SharedStorage) -> Result<MutexGuard<'_, SqliteStorage>, HarvestError> {
    storage
        .lock()
        .map_err(|e| HarvestError::LockPoisoned(e.to_string()))
}

/// Formats a timestamp the way every table stores it
///
/// Fixed UTC offset and second precision keep lexicographic order equal to
/// chronological order.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An ingested video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub query: String,
    pub ingested_at: DateTime<Utc>,
}

/// An item parsed from an upstream page, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub query: String,
}

/// A recurring fetch registration for one query
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRecord {
    pub id: i64,
    pub name: String,
    pub query: String,
    pub interval_secs: u64,
    pub enabled: bool,
    pub created_at: String,
    pub last_run_at: Option<String>,
}

/// One fetch cycle invocation in the run log
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub query: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub new_items: u32,
    pub skipped_items: u32,
    pub malformed_items: u32,
    pub error_message: Option<String>,
}

/// Final counters written when a run finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub new_items: u32,
    pub skipped_items: u32,
    pub malformed_items: u32,
}

/// Status of a fetch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Running,
    Ingested,
    QuotaExhausted,
    UpstreamFailed,
    TimedOut,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Ingested => "ingested",
            Self::QuotaExhausted => "quota_exhausted",
            Self::UpstreamFailed => "upstream_failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "ingested" => Some(Self::Ingested),
            "quota_exhausted" => Some(Self::QuotaExhausted),
            "upstream_failed" => Some(Self::UpstreamFailed),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}
