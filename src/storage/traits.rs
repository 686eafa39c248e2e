//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{Item, NewItem, RunCounts, RunRecord, RunStatus, ScheduleRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every "create" operation here is insert-if-absent against a uniqueness
/// constraint, so concurrent callers racing on the same key converge instead
/// of producing duplicates.
pub trait Storage {
    // ===== Items =====

    /// Checks whether an item with this external id was already ingested
    fn item_exists(&self, external_id: &str) -> StorageResult<bool>;

    /// Inserts a batch of items in one transaction
    ///
    /// Items whose external id already exists are ignored. Returns the number
    /// of rows actually inserted.
    fn insert_items(&mut self, items: &[NewItem]) -> StorageResult<usize>;

    /// Inserts a single item, returning false if its external id exists
    fn insert_item(&mut self, item: &NewItem) -> StorageResult<bool>;

    /// Lists items for a query, most recently published first
    fn list_items(&self, query: &str, offset: u64, limit: u64) -> StorageResult<Vec<Item>>;

    /// Counts items stored for a query
    fn count_items(&self, query: &str) -> StorageResult<u64>;

    /// Counts all stored items
    fn count_total_items(&self) -> StorageResult<u64>;

    /// Distinct query values present among stored items, sorted
    fn distinct_queries(&self) -> StorageResult<Vec<String>>;

    /// Newest publication timestamp stored for a query
    fn latest_published_at(&self, query: &str) -> StorageResult<Option<DateTime<Utc>>>;

    // ===== Key-Value Cache =====

    /// Reads a cache entry
    fn cache_get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a cache entry. Entries never expire.
    fn cache_set(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes a cache entry, returning whether one existed
    fn cache_delete(&mut self, key: &str) -> StorageResult<bool>;

    // ===== Schedule Registrations =====

    /// Creates a registration unless one with `name` exists
    ///
    /// Returns true if a new registration was created.
    fn insert_schedule_if_absent(
        &mut self,
        name: &str,
        query: &str,
        interval_secs: u64,
    ) -> StorageResult<bool>;

    /// Gets a registration by name
    fn get_schedule(&self, name: &str) -> StorageResult<Option<ScheduleRecord>>;

    /// Lists all registrations ordered by creation
    fn list_schedules(&self) -> StorageResult<Vec<ScheduleRecord>>;

    /// Enables or disables a registration, returning whether it exists
    fn set_schedule_enabled(&mut self, name: &str, enabled: bool) -> StorageResult<bool>;

    /// Records when a registration last fired
    fn touch_schedule(&mut self, name: &str, at: DateTime<Utc>) -> StorageResult<()>;

    // ===== Run Log =====

    /// Opens a run for a query in the `Running` state
    fn create_run(&mut self, query: &str) -> StorageResult<i64>;

    /// Closes a run with its final status and counters
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run for a query
    fn get_latest_run(&self, query: &str) -> StorageResult<Option<RunRecord>>;

    /// Counts runs recorded for a query
    fn count_runs(&self, query: &str) -> StorageResult<u64>;
}
