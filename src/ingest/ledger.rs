//! Dedup ledger over ingested items
//!
//! The `items.external_id` uniqueness constraint is the authority; the
//! membership check only avoids parsing entries that are already stored.

use crate::storage::{self, NewItem, SharedStorage, Storage};
use crate::HarvestError;

/// Result of a bulk insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Rows written
    pub inserted: usize,
    /// Items rejected by the uniqueness constraint
    pub duplicates: usize,
    /// Items lost to storage failures
    pub failed: usize,
}

#[derive(Clone)]
pub struct DedupLedger {
    storage: SharedStorage,
}

impl DedupLedger {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub fn exists(&self, external_id: &str) -> Result<bool, HarvestError> {
        Ok(storage::lock(&self.storage)?.item_exists(external_id)?)
    }

    /// Persists `items`, accepting partial success
    ///
    /// The batch is written in one transaction. If that fails the items are
    /// retried one by one and individual failures are skipped. This never
    /// returns an error; losses are counted in the report.
    pub fn insert_all(&self, items: &[NewItem]) -> InsertReport {
        if items.is_empty() {
            return InsertReport::default();
        }

        let mut guard = match storage::lock(&self.storage) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(error = %e, count = items.len(), "Dropping batch, storage unavailable");
                return InsertReport {
                    failed: items.len(),
                    ..InsertReport::default()
                };
            }
        };

        match guard.insert_items(items) {
            Ok(inserted) => {
                return InsertReport {
                    inserted,
                    duplicates: items.len() - inserted,
                    failed: 0,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, count = items.len(), "Bulk insert failed, inserting items individually");
            }
        }

        let mut report = InsertReport::default();
        for item in items {
            match guard.insert_item(item) {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    tracing::error!(external_id = %item.external_id, error = %e, "Failed to insert item");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
