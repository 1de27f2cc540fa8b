//! SQLite access for the job store
//!
//! Plain synchronous functions over a single connection. Only the store
//! workers call these; each worker owns its connection exclusively.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::domain::{Job, JobPatch};

use super::messages::{StoreError, StoreResponse};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    command       TEXT NOT NULL,
    interval_secs INTEGER NOT NULL,
    enabled       INTEGER NOT NULL,
    run_count     INTEGER NOT NULL DEFAULT 0,
    next_run_at   INTEGER,
    last_run_at   INTEGER,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (enabled, next_run_at);
"#;

const JOB_COLUMNS: &str =
    "id, name, command, interval_secs, enabled, run_count, next_run_at, last_run_at, created_at, updated_at";

/// Open one pooled connection
pub(super) fn open_connection(config: &DatabaseConfig) -> StoreResponse<Connection> {
    let open_error = |e: rusqlite::Error| StoreError::Open {
        path: config.path.display().to_string(),
        message: e.to_string(),
    };

    let conn = if config.is_memory() {
        Connection::open_in_memory().map_err(open_error)?
    } else {
        let conn = Connection::open(&config.path).map_err(open_error)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(open_error)?;
        debug!(%mode, path = %config.path.display(), "open_connection: journal mode set");
        conn
    };

    conn.busy_timeout(config.busy_timeout()).map_err(open_error)?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(open_error)?;
    Ok(conn)
}

pub(super) fn migrate(conn: &Connection) -> StoreResponse<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub(super) fn ping(conn: &Connection) -> StoreResponse<()> {
    let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
    if one != 1 {
        return Err(StoreError::Database(format!("unexpected ping result {one}")));
    }
    Ok(())
}

/// Insert `job` and return it as stored (timestamps at millisecond precision)
pub(super) fn create_job(conn: &Connection, job: &Job) -> StoreResponse<Job> {
    insert_job(conn, job)?;
    get_job(conn, &job.id)?.ok_or_else(|| StoreError::NotFound(job.id.clone()))
}

pub(super) fn insert_job(conn: &Connection, job: &Job) -> StoreResponse<()> {
    conn.execute(
        &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            job.id,
            job.name,
            job.command,
            job.interval_secs as i64,
            job.enabled,
            job.run_count as i64,
            job.next_run_at.map(|t| t.timestamp_millis()),
            job.last_run_at.map(|t| t.timestamp_millis()),
            job.created_at.timestamp_millis(),
            job.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub(super) fn get_job(conn: &Connection, id: &str) -> StoreResponse<Option<Job>> {
    let job = conn
        .query_row(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"), [id], row_to_job)
        .optional()?;
    Ok(job)
}

fn write_job(conn: &Connection, job: &Job) -> StoreResponse<()> {
    let changed = conn.execute(
        "UPDATE jobs SET name = ?2, command = ?3, interval_secs = ?4, enabled = ?5, run_count = ?6, \
         next_run_at = ?7, last_run_at = ?8, updated_at = ?9 WHERE id = ?1",
        params![
            job.id,
            job.name,
            job.command,
            job.interval_secs as i64,
            job.enabled,
            job.run_count as i64,
            job.next_run_at.map(|t| t.timestamp_millis()),
            job.last_run_at.map(|t| t.timestamp_millis()),
            job.updated_at.timestamp_millis(),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(job.id.clone()));
    }
    Ok(())
}

/// Read-modify-write of one job inside an immediate transaction
fn modify_job(conn: &mut Connection, id: &str, change: impl FnOnce(&mut Job) -> StoreResponse<()>) -> StoreResponse<Job> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut job = get_job(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    change(&mut job)?;
    write_job(&tx, &job)?;
    let stored = get_job(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    tx.commit()?;
    Ok(stored)
}

pub(super) fn update_job(conn: &mut Connection, id: &str, patch: JobPatch, now: DateTime<Utc>) -> StoreResponse<Job> {
    modify_job(conn, id, |job| job.apply(patch, now).map_err(StoreError::from))
}

/// Fails with `Conflict` when the job is no longer due at `ran_at`
pub(super) fn record_run(conn: &mut Connection, id: &str, ran_at: DateTime<Utc>) -> StoreResponse<Job> {
    modify_job(conn, id, |job| {
        if !job.is_due(ran_at) {
            return Err(StoreError::Conflict(format!("job {} is not due", job.id)));
        }
        job.mark_run(ran_at);
        Ok(())
    })
}

pub(super) fn delete_job(conn: &Connection, id: &str) -> StoreResponse<()> {
    let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

pub(super) fn list_jobs(conn: &Connection, enabled: Option<bool>) -> StoreResponse<Vec<Job>> {
    let mut jobs = Vec::new();
    match enabled {
        Some(enabled) => {
            let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE enabled = ?1 ORDER BY id"))?;
            for job in stmt.query_map([enabled], row_to_job)? {
                jobs.push(job?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id"))?;
            for job in stmt.query_map([], row_to_job)? {
                jobs.push(job?);
            }
        }
    }
    Ok(jobs)
}

pub(super) fn due_jobs(conn: &Connection, now: DateTime<Utc>, limit: usize) -> StoreResponse<Vec<Job>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1 \
         ORDER BY next_run_at LIMIT ?2"
    ))?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut jobs = Vec::new();
    for job in stmt.query_map(params![now.timestamp_millis(), limit], row_to_job)? {
        jobs.push(job?);
    }
    Ok(jobs)
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        command: row.get(2)?,
        interval_secs: row.get::<_, i64>(3)? as u64,
        enabled: row.get(4)?,
        run_count: row.get::<_, i64>(5)? as u64,
        next_run_at: optional_timestamp(row, 6)?,
        last_run_at: optional_timestamp(row, 7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(millis) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis)),
        None => Ok(None),
    }
}
