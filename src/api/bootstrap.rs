//! Read path with cold-query bootstrapping
//!
//! A read for a query with nothing stored runs one fetch cycle before
//! answering, so the first visitor sees results instead of an empty page.
//! The cycle's failures are logged, never surfaced; the reader then simply
//! gets an empty result set.

use super::ApiError;
use crate::config::validate_query;
use crate::ingest::{CycleOutcome, FetchCycle};
use crate::storage::{self, Item, Storage};
use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Validated 1-based page selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Applies defaults and the page size cap
    pub fn new(page: Option<u64>, page_size: Option<u64>) -> Result<Self, ApiError> {
        let page_size = match page_size {
            None => DEFAULT_PAGE_SIZE,
            Some(0) => {
                return Err(ApiError::BadRequest(
                    "page_size must be at least 1.".to_string(),
                ))
            }
            Some(size) => size.min(MAX_PAGE_SIZE),
        };

        match page {
            Some(0) => Err(ApiError::InvalidPage),
            page => Ok(Self {
                page: page.unwrap_or(1),
                page_size,
            }),
        }
    }

    fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// One page of items plus the total for the query
#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub count: u64,
    pub results: Vec<Item>,
}

#[derive(Clone)]
pub struct Bootstrapper {
    cycle: FetchCycle,
}

impl Bootstrapper {
    pub fn new(cycle: FetchCycle) -> Self {
        Self { cycle }
    }

    /// Lists items for `query`, most recently published first
    ///
    /// An absent or blank query reads the default query. Page 1 always
    /// succeeds; any later page must start within the result set.
    pub async fn list(&self, query: Option<&str>, page: PageRequest) -> Result<ItemPage, ApiError> {
        let query = self.cycle.resolve_query(query);
        validate_query(&query).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let mut count = storage::lock(self.cycle.storage())?.count_items(&query)?;
        if count == 0 {
            self.bootstrap(&query).await;
            count = storage::lock(self.cycle.storage())?.count_items(&query)?;
        }

        let offset = page.offset();
        if page.page > 1 && offset >= count {
            return Err(ApiError::InvalidPage);
        }

        let results =
            storage::lock(self.cycle.storage())?.list_items(&query, offset, page.page_size)?;
        Ok(ItemPage { count, results })
    }

    async fn bootstrap(&self, query: &str) {
        tracing::info!(query, "No stored items, fetching before responding");

        match self.cycle.run_if_empty(query).await {
            Ok(Some(CycleOutcome::Ingested(report))) => {
                tracing::info!(query, new_items = report.new_items, "Bootstrap fetch complete")
            }
            Ok(Some(outcome)) => {
                tracing::warn!(query, outcome = ?outcome, "Bootstrap fetch returned no data")
            }
            Ok(None) => tracing::debug!(query, "Items arrived while waiting for bootstrap"),
            Err(e) => tracing::warn!(query, error = %e, "Bootstrap fetch failed"),
        }

        if let Err(e) = self.cycle.registrar().ensure(query) {
            tracing::warn!(query, error = %e, "Failed to register bootstrapped query");
        }
    }
}
