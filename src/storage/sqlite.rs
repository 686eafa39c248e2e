//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    format_timestamp, Item, NewItem, RunCounts, RunRecord, RunStatus, ScheduleRecord,
};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const ITEM_COLUMNS: &str =
    "id, external_id, title, description, published_at, thumbnail_url, query, ingested_at";

const SCHEDULE_COLUMNS: &str = "id, name, query, interval_secs, enabled, created_at, last_run_at";

const RUN_COLUMNS: &str = "id, query, started_at, finished_at, status, new_items, skipped_items,
     malformed_items, error_message";

const INSERT_ITEM_SQL: &str = "INSERT OR IGNORE INTO items
     (external_id, title, description, published_at, thumbnail_url, query, ingested_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database file at `path`
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        published_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
        thumbnail_url: row.get(5)?,
        query: row.get(6)?,
        ingested_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRecord> {
    Ok(ScheduleRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        query: row.get(2)?,
        interval_secs: row.get::<_, i64>(3)?.max(0) as u64,
        enabled: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        last_run_at: row.get(6)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        query: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
        new_items: row.get(5)?,
        skipped_items: row.get(6)?,
        malformed_items: row.get(7)?,
        error_message: row.get(8)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Items =====

    fn item_exists(&self, external_id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM items WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_items(&mut self, items: &[NewItem]) -> StorageResult<usize> {
        let now = format_timestamp(&Utc::now());
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(INSERT_ITEM_SQL)?;
            for item in items {
                inserted += stmt.execute(params![
                    item.external_id,
                    item.title,
                    item.description,
                    format_timestamp(&item.published_at),
                    item.thumbnail_url,
                    item.query,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_item(&mut self, item: &NewItem) -> StorageResult<bool> {
        let now = format_timestamp(&Utc::now());
        let changed = self.conn.execute(
            INSERT_ITEM_SQL,
            params![
                item.external_id,
                item.title,
                item.description,
                format_timestamp(&item.published_at),
                item.thumbnail_url,
                item.query,
                now,
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_items(&self, query: &str, offset: u64, limit: u64) -> StorageResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM items WHERE query = ?1
             ORDER BY published_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map(
                params![query, limit.min(i64::MAX as u64) as i64, offset.min(i64::MAX as u64) as i64],
                item_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn count_items(&self, query: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE query = ?1",
            params![query],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_total_items(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn distinct_queries(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT query FROM items ORDER BY query")?;
        let queries = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(queries)
    }

    fn latest_published_at(&self, query: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(published_at) FROM items WHERE query = ?1",
            params![query],
            |row| row.get(0),
        )?;

        latest
            .map(|value| parse_timestamp(0, &value))
            .transpose()
            .map_err(StorageError::from)
    }

    // ===== Key-Value Cache =====

    fn cache_get(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM cache WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn cache_set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let now = format_timestamp(&Utc::now());
        self.conn.execute(
            "INSERT INTO cache (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn cache_delete(&mut self, key: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM cache WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    // ===== Schedule Registrations =====

    fn insert_schedule_if_absent(
        &mut self,
        name: &str,
        query: &str,
        interval_secs: u64,
    ) -> StorageResult<bool> {
        let now = format_timestamp(&Utc::now());
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO schedules (name, query, interval_secs, enabled, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![name, query, interval_secs.min(i64::MAX as u64) as i64, now],
        )?;
        Ok(created == 1)
    }

    fn get_schedule(&self, name: &str) -> StorageResult<Option<ScheduleRecord>> {
        let schedule = self
            .conn
            .query_row(
                &format!("SELECT {} FROM schedules WHERE name = ?1", SCHEDULE_COLUMNS),
                params![name],
                schedule_from_row,
            )
            .optional()?;
        Ok(schedule)
    }

    fn list_schedules(&self) -> StorageResult<Vec<ScheduleRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM schedules ORDER BY id",
            SCHEDULE_COLUMNS
        ))?;
        let schedules = stmt
            .query_map([], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    fn set_schedule_enabled(&mut self, name: &str, enabled: bool) -> StorageResult<bool> {
        let updated = self.conn.execute(
            "UPDATE schedules SET enabled = ?1 WHERE name = ?2",
            params![enabled as i64, name],
        )?;
        Ok(updated > 0)
    }

    fn touch_schedule(&mut self, name: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE schedules SET last_run_at = ?1 WHERE name = ?2",
            params![format_timestamp(&at), name],
        )?;
        Ok(())
    }

    // ===== Run Log =====

    fn create_run(&mut self, query: &str) -> StorageResult<i64> {
        let now = format_timestamp(&Utc::now());
        self.conn.execute(
            "INSERT INTO fetch_runs (query, started_at, status) VALUES (?1, ?2, ?3)",
            params![query, now, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = format_timestamp(&Utc::now());
        let updated = self.conn.execute(
            "UPDATE fetch_runs SET finished_at = ?1, status = ?2, new_items = ?3,
             skipped_items = ?4, malformed_items = ?5, error_message = ?6 WHERE id = ?7",
            params![
                now,
                status.to_db_string(),
                counts.new_items,
                counts.skipped_items,
                counts.malformed_items,
                error_message,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM fetch_runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self, query: &str) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM fetch_runs WHERE query = ?1 ORDER BY id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![query],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn count_runs(&self, query: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fetch_runs WHERE query = ?1",
            params![query],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
