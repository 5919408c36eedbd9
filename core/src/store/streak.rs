use super::{date_to_sql, opt_date_col, to_millis, Db};
use crate::{error::CoinResult, streak_tracker::UserStreak};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl Db<'_> {
    // ── Login streaks ─────────────────────────────────────────────

    pub fn streak(&self, user_id: &str) -> CoinResult<Option<UserStreak>> {
        let streak = self
            .conn
            .query_row(
                "SELECT user_id, current_streak, longest_streak, last_login_date, streak_multiplier
                 FROM user_streak WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserStreak {
                        user_id:           row.get(0)?,
                        current_streak:    row.get(1)?,
                        longest_streak:    row.get(2)?,
                        last_login_date:   opt_date_col(row, 3)?,
                        streak_multiplier: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(streak)
    }

    pub fn save_streak(&self, streak: &UserStreak, now: DateTime<Utc>) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO user_streak (user_id, current_streak, longest_streak, last_login_date, streak_multiplier, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                last_login_date = excluded.last_login_date,
                streak_multiplier = excluded.streak_multiplier,
                updated_at = excluded.updated_at",
            params![
                streak.user_id,
                streak.current_streak,
                streak.longest_streak,
                streak.last_login_date.map(date_to_sql),
                streak.streak_multiplier,
                to_millis(now),
            ],
        )?;
        Ok(())
    }
}
