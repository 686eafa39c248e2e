//! Per-query continuation tokens
//!
//! A cursor is either present (more pages may follow) or absent. Absent
//! covers both "never fetched" and "caught up": after the upstream reports
//! no further pages the entry is removed, so the next cycle restarts from
//! the most recent results.

use crate::storage::{self, SharedStorage, Storage};
use crate::HarvestError;

/// Namespace prefix for cursor cache keys
pub const CURSOR_KEY_PREFIX: &str = "page_token:";

/// Cache key holding the cursor for `query`
pub fn cursor_key(query: &str) -> String {
    format!("{}{}", CURSOR_KEY_PREFIX, query)
}

/// Durable mapping from query to continuation token
#[derive(Clone)]
pub struct CursorStore {
    storage: SharedStorage,
}

impl CursorStore {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, query: &str) -> Result<Option<String>, HarvestError> {
        Ok(storage::lock(&self.storage)?.cache_get(&cursor_key(query))?)
    }

    /// Stores `token` for `query` with no expiry
    pub fn set(&self, query: &str, token: &str) -> Result<(), HarvestError> {
        storage::lock(&self.storage)?.cache_set(&cursor_key(query), token)?;
        Ok(())
    }

    /// Removes the cursor for `query`, returning whether one was stored
    pub fn clear(&self, query: &str) -> Result<bool, HarvestError> {
        Ok(storage::lock(&self.storage)?.cache_delete(&cursor_key(query))?)
    }
}
