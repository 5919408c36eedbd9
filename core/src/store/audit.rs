use super::{instant_col, to_millis, Db};
use crate::{error::CoinResult, event::EventLogEntry, types::UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

/// A persisted anti-abuse flag, kept for operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousFlag {
    pub id:           Option<i64>,
    pub user_id:      UserId,
    pub action:       String,
    pub attempts:     u32,
    pub window_secs:  u64,
    pub flagged_at:   DateTime<Utc>,
    pub locked_until: DateTime<Utc>,
}

impl Db<'_> {
    // ── Event log ─────────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO engine_event (event_type, user_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.event_type,
                entry.user_id,
                entry.payload,
                to_millis(entry.created_at),
            ],
        )?;
        Ok(())
    }

    /// Oldest first.
    pub fn events_for_user(&self, user_id: &str) -> CoinResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, user_id, payload, created_at
             FROM engine_event WHERE user_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Newest first.
    pub fn recent_events(&self, limit: usize) -> CoinResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, user_id, payload, created_at
             FROM engine_event ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Suspicious flags ──────────────────────────────────────────

    pub fn insert_suspicious_flag(&self, flag: &SuspiciousFlag) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO suspicious_flag (user_id, action, attempts, window_secs, flagged_at, locked_until)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                flag.user_id,
                flag.action,
                flag.attempts,
                flag.window_secs as i64,
                to_millis(flag.flagged_at),
                to_millis(flag.locked_until),
            ],
        )?;
        Ok(())
    }

    /// Newest first; every user when `user_id` is None.
    pub fn suspicious_flags(&self, user_id: Option<&str>) -> CoinResult<Vec<SuspiciousFlag>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, action, attempts, window_secs, flagged_at, locked_until
             FROM suspicious_flag
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY id DESC",
        )?;
        let flags = stmt
            .query_map(params![user_id], |row| {
                Ok(SuspiciousFlag {
                    id:           Some(row.get(0)?),
                    user_id:      row.get(1)?,
                    action:       row.get(2)?,
                    attempts:     row.get(3)?,
                    window_secs:  row.get::<_, i64>(4)? as u64,
                    flagged_at:   instant_col(row, 5)?,
                    locked_until: instant_col(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(flags)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventLogEntry> {
    Ok(EventLogEntry {
        id:         Some(row.get(0)?),
        event_type: row.get(1)?,
        user_id:    row.get(2)?,
        payload:    row.get(3)?,
        created_at: instant_col(row, 4)?,
    })
}
