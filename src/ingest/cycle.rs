//! Fetch cycle orchestration
//!
//! One cycle fetches a single page for one query:
//! 1. Ensure the query has a schedule registration
//! 2. Resolve the cursor and the current credential
//! 3. Request the page
//! 4. On quota exhaustion, rotate the credential and try again (bounded)
//! 5. Ingest new items and move the cursor forward, or clear it when the
//!    upstream has no further pages
//!
//! Cycles for the same query are serialized through [`QueryLocks`].

use super::client::{SearchClient, SearchOutcome, SearchPage};
use super::credentials::CredentialRotator;
use super::cursor::CursorStore;
use super::item;
use super::ledger::DedupLedger;
use crate::config::Config;
use crate::schedule::{schedule_name, ScheduleRegistrar};
use crate::storage::{self, NewItem, RunCounts, RunStatus, SharedStorage, Storage};
use crate::HarvestError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upstream error bodies are cut to this many characters before logging
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Tunables for a fetch cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub default_query: String,
    pub max_quota_retries: u32,
    pub quota_backoff: Duration,
    pub cycle_timeout: Duration,
    pub interval_secs: u64,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_query: config.default_query.clone(),
            max_quota_retries: config.schedule.max_quota_retries,
            quota_backoff: Duration::from_millis(config.schedule.quota_backoff_millis),
            cycle_timeout: Duration::from_secs(config.schedule.cycle_timeout_secs),
            interval_secs: config.schedule.interval_secs,
        }
    }
}

/// Counters for one ingested page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries in the upstream page
    pub fetched: usize,
    pub new_items: usize,
    /// Entries already stored, or repeated within the page
    pub skipped_existing: usize,
    /// Entries skipped for missing fields or bad timestamps
    pub malformed: usize,
    pub failed_inserts: usize,
    /// Cursor stored after the page; `None` means it was cleared
    pub next_cursor: Option<String>,
}

/// How a fetch cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The page was fetched and ingested
    Ingested(CycleReport),

    /// Every attempt was rejected for quota
    QuotaExhausted { attempts: u32 },

    /// Network failure or non-quota HTTP error; nothing was changed
    UpstreamFailed { error: String },

    /// Another cycle for the same query was in progress
    Busy,

    /// The cycle exceeded its time limit and was abandoned
    TimedOut,
}

impl CycleOutcome {
    fn run_status(&self) -> Option<RunStatus> {
        match self {
            Self::Ingested(_) => Some(RunStatus::Ingested),
            Self::QuotaExhausted { .. } => Some(RunStatus::QuotaExhausted),
            Self::UpstreamFailed { .. } => Some(RunStatus::UpstreamFailed),
            Self::TimedOut => Some(RunStatus::TimedOut),
            Self::Busy => None,
        }
    }

    fn run_counts(&self) -> RunCounts {
        match self {
            Self::Ingested(report) => RunCounts {
                new_items: count(report.new_items),
                skipped_items: count(report.skipped_existing),
                malformed_items: count(report.malformed),
            },
            _ => RunCounts::default(),
        }
    }

    fn run_message(&self) -> Option<String> {
        match self {
            Self::QuotaExhausted { attempts } => {
                Some(format!("quota exhausted after {} attempts", attempts))
            }
            Self::UpstreamFailed { error } => Some(error.clone()),
            Self::TimedOut => Some("cycle timed out".to_string()),
            _ => None,
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Process-wide execution locks, one per query
#[derive(Clone, Default)]
pub struct QueryLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl QueryLocks {
    fn handle(&self, query: &str) -> Arc<tokio::sync::Mutex<()>> {
        // The map only ever gains entries, so a poisoned lock is still usable
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(query.to_string()).or_default().clone()
    }

    /// True when a cycle for `query` currently holds its lock
    pub fn is_held(&self, query: &str) -> bool {
        let lock = self.handle(query);
        let held = lock.try_lock().is_err();
        held
    }
}

/// Runs fetch cycles against the upstream search API
#[derive(Clone)]
pub struct FetchCycle {
    settings: CycleSettings,
    client: SearchClient,
    credentials: Arc<CredentialRotator>,
    cursors: CursorStore,
    ledger: DedupLedger,
    registrar: ScheduleRegistrar,
    storage: SharedStorage,
    locks: QueryLocks,
}

impl FetchCycle {
    pub fn new(config: &Config, storage: SharedStorage) -> Result<Self, HarvestError> {
        let settings = CycleSettings::from_config(config);
        Ok(Self {
            client: SearchClient::new(&config.upstream)?,
            credentials: Arc::new(CredentialRotator::new(
                config.upstream.credentials(),
                storage.clone(),
            )?),
            cursors: CursorStore::new(storage.clone()),
            ledger: DedupLedger::new(storage.clone()),
            registrar: ScheduleRegistrar::new(storage.clone(), settings.interval_secs),
            storage,
            locks: QueryLocks::default(),
            settings,
        })
    }

    pub fn registrar(&self) -> &ScheduleRegistrar {
        &self.registrar
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn locks(&self) -> &QueryLocks {
        &self.locks
    }

    /// Trims `query`, falling back to the default query when none is given
    pub fn resolve_query(&self, query: Option<&str>) -> String {
        match query.map(str::trim) {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => self.settings.default_query.clone(),
        }
    }

    /// Runs one cycle, waiting for any in-progress cycle for `query` first
    ///
    /// Upstream failures are reported through the outcome. An error means
    /// durable state could not be read or written.
    pub async fn run(&self, query: &str) -> Result<CycleOutcome, HarvestError> {
        let lock = self.locks.handle(query);
        let _guard = lock.lock().await;
        self.run_locked(query).await
    }

    /// Runs one cycle unless one for `query` is already in progress
    pub async fn run_if_idle(&self, query: &str) -> Result<CycleOutcome, HarvestError> {
        let lock = self.locks.handle(query);
        let _guard = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(query, "Cycle already in progress, skipping");
                return Ok(CycleOutcome::Busy);
            }
        };
        self.run_locked(query).await
    }

    /// Runs one cycle for `query` only if nothing is stored for it yet
    ///
    /// Callers queued behind another cycle for the same query re-check after
    /// it finishes, so a burst of cold reads triggers a single fetch.
    /// Returns `None` when items were already present.
    pub async fn run_if_empty(&self, query: &str) -> Result<Option<CycleOutcome>, HarvestError> {
        let lock = self.locks.handle(query);
        let _guard = lock.lock().await;

        let stored = storage::lock(&self.storage)?.count_items(query)?;
        if stored > 0 {
            return Ok(None);
        }
        self.run_locked(query).await.map(Some)
    }

    async fn run_locked(&self, query: &str) -> Result<CycleOutcome, HarvestError> {
        let run_id = storage::lock(&self.storage)?.create_run(query)?;

        let outcome =
            match tokio::time::timeout(self.settings.cycle_timeout, self.execute(query)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tracing::error!(query, error = %e, "Fetch cycle failed");
                    self.abandon_run(run_id, &e);
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(
                        query,
                        timeout_secs = self.settings.cycle_timeout.as_secs(),
                        "Fetch cycle timed out"
                    );
                    CycleOutcome::TimedOut
                }
            };

        if let Some(status) = outcome.run_status() {
            let mut guard = storage::lock(&self.storage)?;
            guard.finish_run(
                run_id,
                status,
                &outcome.run_counts(),
                outcome.run_message().as_deref(),
            )?;
            guard.touch_schedule(&schedule_name(query), Utc::now())?;
        }

        Ok(outcome)
    }

    fn abandon_run(&self, run_id: i64, error: &HarvestError) {
        let result = storage::lock(&self.storage).and_then(|mut guard| {
            guard.finish_run(
                run_id,
                RunStatus::UpstreamFailed,
                &RunCounts::default(),
                Some(&error.to_string()),
            )?;
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(run_id, error = %e, "Failed to record abandoned run");
        }
    }

    async fn execute(&self, query: &str) -> Result<CycleOutcome, HarvestError> {
        self.registrar.ensure(query)?;

        // Rotations allowed before giving up; more than n-1 would only
        // revisit credentials already rejected in this cycle
        let alternatives = u32::try_from(self.credentials.len() - 1).unwrap_or(u32::MAX);
        let rotation_budget = self.settings.max_quota_retries.min(alternatives);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let cursor = self.cursors.get(query)?;
            let credential = self.credentials.current();

            tracing::debug!(
                query,
                attempt,
                credential = %credential.key,
                cursor = cursor.as_deref().unwrap_or(""),
                "Requesting page"
            );

            match self
                .client
                .search(query, &credential.key, cursor.as_deref())
                .await
            {
                SearchOutcome::Page(page) => return self.ingest_page(query, page),
                SearchOutcome::QuotaExceeded { status } => {
                    tracing::warn!(query, attempt, status, credential = %credential.key, "Upstream quota exceeded");

                    // Rotate even when giving up so the next cycle starts
                    // on a credential that was not just rejected
                    let rotated = self.credentials.rotate_past(&credential);
                    if !rotated || attempt > rotation_budget {
                        tracing::error!(query, attempts = attempt, "Giving up after quota exhaustion");
                        return Ok(CycleOutcome::QuotaExhausted { attempts: attempt });
                    }

                    tokio::time::sleep(self.settings.quota_backoff).await;
                }
                SearchOutcome::HttpError { status, body } => {
                    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
                    tracing::warn!(query, status, body = %body, "Upstream request failed");
                    return Ok(CycleOutcome::UpstreamFailed {
                        error: format!("HTTP {}: {}", status, body),
                    });
                }
                SearchOutcome::NetworkError { error } => {
                    tracing::warn!(query, error = %error, "Upstream unreachable");
                    return Ok(CycleOutcome::UpstreamFailed { error });
                }
                SearchOutcome::InvalidBody { error } => {
                    tracing::warn!(query, error = %error, "Upstream returned an unreadable page");
                    return Ok(CycleOutcome::UpstreamFailed {
                        error: format!("invalid response body: {}", error),
                    });
                }
            }
        }
    }

    fn ingest_page(&self, query: &str, page: SearchPage) -> Result<CycleOutcome, HarvestError> {
        let mut report = CycleReport {
            fetched: page.items.len(),
            ..CycleReport::default()
        };
        let mut seen = HashSet::new();
        let mut fresh: Vec<NewItem> = Vec::new();

        for entry in &page.items {
            let Some(external_id) = item::external_id(entry) else {
                tracing::warn!(query, "Skipping entry without a video id");
                report.malformed += 1;
                continue;
            };

            if !seen.insert(external_id) || self.ledger.exists(external_id)? {
                report.skipped_existing += 1;
                continue;
            }

            match item::parse_item(entry, query) {
                Ok(item) => fresh.push(item),
                Err(e) => {
                    tracing::warn!(query, external_id, error = %e, "Skipping malformed entry");
                    report.malformed += 1;
                }
            }
        }

        let inserted = self.ledger.insert_all(&fresh);
        report.new_items = inserted.inserted;
        report.skipped_existing += inserted.duplicates;
        report.failed_inserts = inserted.failed;

        match page.next_page_token.as_deref() {
            Some(token) => self.cursors.set(query, token)?,
            None => {
                self.cursors.clear(query)?;
            }
        }
        report.next_cursor = page.next_page_token;

        tracing::info!(
            query,
            fetched = report.fetched,
            new_items = report.new_items,
            skipped = report.skipped_existing,
            malformed = report.malformed,
            more_pages = report.next_cursor.is_some(),
            "Ingested page"
        );

        Ok(CycleOutcome::Ingested(report))
    }
}
