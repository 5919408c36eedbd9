use super::{date_col, date_to_sql, instant_col, to_millis, Db};
use crate::{
    daily_code::{DailyCode, UserCode},
    error::CoinResult,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

impl Db<'_> {
    // ── Daily codes ───────────────────────────────────────────────

    pub fn daily_code(&self, code: &str) -> CoinResult<Option<DailyCode>> {
        let found = self
            .conn
            .query_row(
                "SELECT code, reward_date, created_at, claimable_until, valid_until
                 FROM daily_code WHERE code = ?1",
                params![code],
                daily_code_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn daily_code_for_date(&self, reward_date: NaiveDate) -> CoinResult<Option<DailyCode>> {
        let found = self
            .conn
            .query_row(
                "SELECT code, reward_date, created_at, claimable_until, valid_until
                 FROM daily_code WHERE reward_date = ?1",
                params![date_to_sql(reward_date)],
                daily_code_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Returns false when a code already exists for that reward-day.
    pub fn insert_daily_code(&self, code: &DailyCode) -> CoinResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO daily_code (code, reward_date, created_at, claimable_until, valid_until)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                code.code,
                date_to_sql(code.reward_date),
                to_millis(code.created_at),
                to_millis(code.claimable_until),
                to_millis(code.valid_until),
            ],
        )?;
        Ok(inserted == 1)
    }

    // ── Claimed codes ─────────────────────────────────────────────

    pub fn user_code(&self, user_id: &str, code: &str) -> CoinResult<Option<UserCode>> {
        let found = self
            .conn
            .query_row(
                "SELECT user_id, code, reward_date, added_at, expires_at, streak_position
                 FROM user_code WHERE user_id = ?1 AND code = ?2",
                params![user_id, code],
                user_code_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn user_code_for_date(&self, user_id: &str, reward_date: NaiveDate) -> CoinResult<Option<UserCode>> {
        let found = self
            .conn
            .query_row(
                "SELECT user_id, code, reward_date, added_at, expires_at, streak_position
                 FROM user_code WHERE user_id = ?1 AND reward_date = ?2",
                params![user_id, date_to_sql(reward_date)],
                user_code_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn insert_user_code(&self, user_code: &UserCode) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO user_code (user_id, code, reward_date, added_at, expires_at, streak_position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_code.user_id,
                user_code.code,
                date_to_sql(user_code.reward_date),
                to_millis(user_code.added_at),
                to_millis(user_code.expires_at),
                user_code.streak_position,
            ],
        )?;
        Ok(())
    }

    /// Unexpired claimed codes, oldest reward-day first.
    pub fn user_codes_valid_at(&self, user_id: &str, at: DateTime<Utc>) -> CoinResult<Vec<UserCode>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, code, reward_date, added_at, expires_at, streak_position
             FROM user_code WHERE user_id = ?1 AND expires_at > ?2
             ORDER BY reward_date ASC",
        )?;
        let codes = stmt
            .query_map(params![user_id, to_millis(at)], user_code_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(codes)
    }
}

fn daily_code_from_row(row: &Row<'_>) -> rusqlite::Result<DailyCode> {
    Ok(DailyCode {
        code:            row.get(0)?,
        reward_date:     date_col(row, 1)?,
        created_at:      instant_col(row, 2)?,
        claimable_until: instant_col(row, 3)?,
        valid_until:     instant_col(row, 4)?,
    })
}

fn user_code_from_row(row: &Row<'_>) -> rusqlite::Result<UserCode> {
    Ok(UserCode {
        user_id:         row.get(0)?,
        code:            row.get(1)?,
        reward_date:     date_col(row, 2)?,
        added_at:        instant_col(row, 3)?,
        expires_at:      instant_col(row, 4)?,
        streak_position: row.get(5)?,
    })
}
