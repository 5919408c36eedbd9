//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call `Db` methods inside a `read` or `write` unit; they never
//! execute SQL directly.
//!
//! A `write` unit is one `BEGIN IMMEDIATE` transaction: it either commits
//! every statement issued through its `Db` or none of them. Connections sit
//! behind mutexes acquired with a timeout, so no caller waits on storage
//! indefinitely. File-backed stores keep a second, read-only connection
//! so WAL readers (reconciliation, history) never queue behind writers.

use crate::{
    config::StoreConfig,
    error::{CoinError, CoinResult},
    types::CancelToken,
};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{types::Type, Connection, Row, TransactionBehavior};
use std::time::Duration;

mod account;
mod audit;
mod code;
mod product;
mod rule;
mod setting;
mod streak;

pub use audit::SuspiciousFlag;

pub struct CoinStore {
    conn:         Mutex<Connection>,
    reader:       Option<Mutex<Connection>>,
    path:         Option<String>, // None for :memory:, Some(path) for file
    lock_timeout: Duration,
}

/// Statement access for the duration of one read or write unit.
pub struct Db<'c> {
    conn: &'c Connection,
}

impl CoinStore {
    pub fn open(path: &str, config: &StoreConfig) -> CoinResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        let reader = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        reader.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self {
            conn:         Mutex::new(conn),
            reader:       Some(Mutex::new(reader)),
            path:         Some(path.to_string()),
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CoinResult<Self> {
        Self::in_memory_with(&StoreConfig::default())
    }

    pub fn in_memory_with(config: &StoreConfig) -> CoinResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn:         Mutex::new(conn),
            reader:       None,
            path:         None,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CoinResult<()> {
        let conn = self.lock("migrate")?;
        conn.execute_batch(include_str!("../../../migrations/001_coin_ledger.sql"))?;
        Ok(())
    }

    /// Run an idempotent read. A timeout is retried once before it is
    /// reported to the caller.
    pub fn read<T>(
        &self,
        operation: &'static str,
        f: impl Fn(&Db<'_>) -> CoinResult<T>,
    ) -> CoinResult<T> {
        match self.read_once(operation, &f) {
            Err(CoinError::Timeout { .. }) => {
                log::debug!("store: retrying read '{operation}' after timeout");
                self.read_once(operation, &f)
            }
            other => other,
        }
    }

    fn read_once<T>(
        &self,
        operation: &'static str,
        f: &impl Fn(&Db<'_>) -> CoinResult<T>,
    ) -> CoinResult<T> {
        let Some(reader) = &self.reader else {
            let conn = self.lock(operation)?;
            return f(&Db { conn: &*conn });
        };
        let conn = reader
            .try_lock_for(self.lock_timeout)
            .ok_or(CoinError::Timeout { operation })?;
        f(&Db { conn: &*conn })
    }

    /// Run `f` as one atomic unit. Any error rolls every statement back.
    /// Writes are never retried.
    pub fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Db<'_>) -> CoinResult<T>,
    ) -> CoinResult<T> {
        self.write_cancellable(operation, &CancelToken::never(), f)
    }

    /// Like `write`, but rolls back instead of committing when `cancel`
    /// fired before the commit point.
    pub fn write_cancellable<T>(
        &self,
        operation: &'static str,
        cancel: &CancelToken,
        f: impl FnOnce(&Db<'_>) -> CoinResult<T>,
    ) -> CoinResult<T> {
        if cancel.is_cancelled() {
            return Err(CoinError::Cancelled);
        }
        let mut conn = self.lock(operation)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&Db { conn: &*tx })?;
        if cancel.is_cancelled() {
            log::debug!("store: '{operation}' cancelled before commit, rolling back");
            return Err(CoinError::Cancelled);
        }
        tx.commit()?;
        Ok(out)
    }

    fn lock(&self, operation: &'static str) -> CoinResult<MutexGuard<'_, Connection>> {
        self.conn
            .try_lock_for(self.lock_timeout)
            .ok_or(CoinError::Timeout { operation })
    }
}

// ── Column helpers ─────────────────────────────────────────────────

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn instant_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(from_millis(row.get::<_, i64>(idx)?))
}

pub(crate) fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => date_col(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}
