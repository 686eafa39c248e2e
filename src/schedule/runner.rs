//! Recurring fetch runner
//!
//! On every tick the runner re-reads the registrations from storage, works
//! out which queries are due and spawns one fetch cycle per due query.
//! Cycles for different queries run concurrently; a cycle that is still
//! running when its query comes due again is skipped, not queued.

use crate::ingest::{CycleOutcome, FetchCycle};
use crate::storage::{self, ScheduleRecord, Storage};
use crate::HarvestError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// A finished scheduled cycle and the query it ran for
pub type CycleResult = (String, Result<CycleOutcome, HarvestError>);

#[derive(Debug, Clone)]
struct Slot {
    query: String,
    interval: ChronoDuration,
    next_due: DateTime<Utc>,
}

impl Slot {
    fn from_record(record: &ScheduleRecord, now: DateTime<Utc>) -> Self {
        let interval = interval_of(record);
        let last_run = record
            .last_run_at
            .as_deref()
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
            .map(|at| at.with_timezone(&Utc));

        Self {
            query: record.query.clone(),
            interval,
            next_due: last_run.map_or(now, |at| at + interval),
        }
    }
}

/// Upper bound on a registration interval (one year)
const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

fn interval_of(record: &ScheduleRecord) -> ChronoDuration {
    ChronoDuration::seconds(record.interval_secs.clamp(1, MAX_INTERVAL_SECS) as i64)
}

/// Fires fetch cycles for enabled schedule registrations
pub struct Scheduler {
    cycle: FetchCycle,
    tick: Duration,
    slots: HashMap<String, Slot>,
    tasks: JoinSet<CycleResult>,
}

impl Scheduler {
    pub fn new(cycle: FetchCycle, tick: Duration) -> Self {
        Self {
            cycle,
            tick,
            slots: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Reconciles in-memory slots with the stored registrations
    ///
    /// New registrations are picked up, disabled or removed ones dropped.
    /// Returns the number of active slots.
    pub fn sync(&mut self, now: DateTime<Utc>) -> Result<usize, HarvestError> {
        let records = storage::lock(self.cycle.storage())?.list_schedules()?;

        self.slots
            .retain(|name, _| records.iter().any(|r| r.enabled && &r.name == name));

        for record in records.iter().filter(|r| r.enabled) {
            match self.slots.get_mut(&record.name) {
                Some(slot) => slot.interval = interval_of(record),
                None => {
                    tracing::debug!(query = %record.query, name = %record.name, "Tracking registration");
                    self.slots
                        .insert(record.name.clone(), Slot::from_record(record, now));
                }
            }
        }

        Ok(self.slots.len())
    }

    /// Queries due at `now`, advancing each returned slot by its interval
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<String> = Vec::new();
        for slot in self.slots.values_mut() {
            if slot.next_due <= now {
                due.push(slot.query.clone());
                slot.next_due = now + slot.interval;
            }
        }
        due.sort();
        due
    }

    /// Runs one scheduling pass, returning the number of cycles spawned
    pub fn tick(&mut self) -> Result<usize, HarvestError> {
        self.reap();

        let now = Utc::now();
        self.sync(now)?;
        let due = self.due(now);
        if due.is_empty() {
            return Ok(0);
        }

        tracing::debug!(count = due.len(), "Queries due for fetching");
        for query in &due {
            let cycle = self.cycle.clone();
            let query = query.clone();
            self.tasks.spawn(async move {
                let outcome = cycle.run_if_idle(&query).await;
                (query, outcome)
            });
        }
        Ok(due.len())
    }

    /// Waits for every in-flight cycle and returns their results
    pub async fn drain(&mut self) -> Vec<CycleResult> {
        let mut results = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => {
                    log_result(&result);
                    results.push(result);
                }
                Err(e) => tracing::error!(error = %e, "Fetch task panicked or was cancelled"),
            }
        }
        results
    }

    /// Ticks until `shutdown` resolves, then waits for in-flight cycles
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(tick_millis = self.tick.as_millis() as u64, "Scheduler started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }

        tracing::info!(in_flight = self.tasks.len(), "Scheduler stopping");
        self.drain().await;
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            match joined {
                Ok(result) => log_result(&result),
                Err(e) => tracing::error!(error = %e, "Fetch task panicked or was cancelled"),
            }
        }
    }
}

fn log_result((query, outcome): &CycleResult) {
    match outcome {
        Ok(CycleOutcome::Ingested(report)) => {
            tracing::debug!(query = %query, new_items = report.new_items, "Scheduled fetch complete")
        }
        Ok(CycleOutcome::Busy) => {}
        Ok(other) => tracing::warn!(query = %query, outcome = ?other, "Scheduled fetch did not ingest"),
        Err(e) => tracing::error!(query = %query, error = %e, "Scheduled fetch failed"),
    }
}
