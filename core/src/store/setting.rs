use super::{to_millis, Db};
use crate::error::{CoinError, CoinResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

impl Db<'_> {
    // ── Settings ──────────────────────────────────────────────────
    //
    // Rows hold JSON, but nothing outside this file sees it: values are
    // decoded into their typed struct here or rejected with InvalidSetting.

    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> CoinResult<Option<T>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM coin_setting WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| CoinError::InvalidSetting {
                key:    key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    pub fn put_setting<T: Serialize>(&self, key: &str, value: &T, now: DateTime<Utc>) -> CoinResult<()> {
        let raw = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO coin_setting (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, to_millis(now)],
        )?;
        Ok(())
    }
}
