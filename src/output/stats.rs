//! Ingestion statistics
//!
//! Per-query overview of what has been stored, whether the query is
//! registered for polling and how its last fetch went.

use crate::schedule::schedule_name;
use crate::storage::{RunStatus, Storage};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Statistics for a single tracked query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatistics {
    pub query: String,

    /// Items stored under this query
    pub items: u64,

    /// Newest `published_at` among the stored items
    pub latest_published_at: Option<DateTime<Utc>>,

    /// `None` when the query has no registration, otherwise whether it is enabled
    pub schedule_enabled: Option<bool>,

    pub last_run_at: Option<String>,

    pub last_run_status: Option<RunStatus>,

    /// Fetch cycles recorded in the run log
    pub runs: u64,
}

/// Statistics summary across all queries
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestStatistics {
    pub total_items: u64,
    pub queries: Vec<QueryStatistics>,
}

/// Loads statistics from storage
///
/// Queries are collected from both stored items and registrations, sorted
/// by name.
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics, HarvestError> {
    let schedules = storage.list_schedules()?;

    let mut names: BTreeSet<String> = storage.distinct_queries()?.into_iter().collect();
    names.extend(schedules.iter().map(|s| s.query.clone()));

    let mut queries = Vec::with_capacity(names.len());
    for query in names {
        let schedule = schedules.iter().find(|s| s.name == schedule_name(&query));
        let last_run = storage.get_latest_run(&query)?;

        queries.push(QueryStatistics {
            items: storage.count_items(&query)?,
            latest_published_at: storage.latest_published_at(&query)?,
            schedule_enabled: schedule.map(|s| s.enabled),
            last_run_at: schedule.and_then(|s| s.last_run_at.clone()),
            last_run_status: last_run.map(|r| r.status),
            runs: storage.count_runs(&query)?,
            query,
        });
    }

    Ok(HarvestStatistics {
        total_items: storage.count_total_items()?,
        queries,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Total items: {}", stats.total_items);
    println!("  Tracked queries: {}", stats.queries.len());
    println!();

    if stats.queries.is_empty() {
        println!("No queries tracked yet.");
        return;
    }

    println!("Queries:");
    for q in &stats.queries {
        let schedule = match q.schedule_enabled {
            Some(true) => "scheduled",
            Some(false) => "paused",
            None => "unregistered",
        };
        let latest = q
            .latest_published_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let status = q
            .last_run_status
            .map(|s| s.to_db_string())
            .unwrap_or("never run");

        println!("  {} ({})", q.query, schedule);
        println!("    Items: {} (newest published {})", q.items, latest);
        println!(
            "    Runs: {} (last: {}, at {})",
            q.runs,
            status,
            q.last_run_at.as_deref().unwrap_or("-")
        );
    }
}
