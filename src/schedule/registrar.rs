//! Schedule registrations for tracked queries

use crate::storage::{self, SharedStorage, Storage};
use crate::HarvestError;

/// Prefix of every registration name; the query text follows it verbatim
pub const SCHEDULE_NAME_PREFIX: &str = "fetch_videos:";

/// Deterministic registration name for `query`
pub fn schedule_name(query: &str) -> String {
    format!("{}{}", SCHEDULE_NAME_PREFIX, query)
}

/// Ensures every tracked query has exactly one recurring fetch registration
#[derive(Clone)]
pub struct ScheduleRegistrar {
    storage: SharedStorage,
    interval_secs: u64,
}

impl ScheduleRegistrar {
    pub fn new(storage: SharedStorage, interval_secs: u64) -> Self {
        Self {
            storage,
            interval_secs,
        }
    }

    /// Registers `query` unless a registration already exists
    ///
    /// The insert and the existence check are one statement against the
    /// unique name column, so concurrent callers cannot both create one.
    /// Returns true when a registration was created.
    pub fn ensure(&self, query: &str) -> Result<bool, HarvestError> {
        let name = schedule_name(query);
        let created = storage::lock(&self.storage)?.insert_schedule_if_absent(
            &name,
            query,
            self.interval_secs,
        )?;

        if created {
            tracing::info!(query, name = %name, interval_secs = self.interval_secs, "Registered recurring fetch");
        }
        Ok(created)
    }

    /// Registers the default query and every query that already has items
    ///
    /// Returns the number of registrations created.
    pub fn ensure_known_queries(&self, default_query: &str) -> Result<usize, HarvestError> {
        let mut queries = storage::lock(&self.storage)?.distinct_queries()?;
        if !queries.iter().any(|q| q == default_query) {
            queries.insert(0, default_query.to_string());
        }

        let mut created = 0;
        for query in &queries {
            if self.ensure(query)? {
                created += 1;
            }
        }

        tracing::debug!(known = queries.len(), created, "Registration sweep complete");
        Ok(created)
    }
}
