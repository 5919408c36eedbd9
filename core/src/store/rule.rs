use super::{from_millis, to_millis, Db};
use crate::{error::CoinResult, rule_registry::CoinRule};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

impl Db<'_> {
    // ── Rules ─────────────────────────────────────────────────────

    pub fn rule(&self, action: &str) -> CoinResult<Option<CoinRule>> {
        let rule = self
            .conn
            .query_row(
                "SELECT action, amount, max_per_day, max_per_month, cooldown_minutes, is_active
                 FROM coin_rule WHERE action = ?1",
                params![action],
                rule_from_row,
            )
            .optional()?;
        Ok(rule)
    }

    pub fn all_rules(&self) -> CoinResult<Vec<CoinRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT action, amount, max_per_day, max_per_month, cooldown_minutes, is_active
             FROM coin_rule ORDER BY action ASC",
        )?;
        let rows = stmt.query_map([], rule_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn upsert_rule(&self, rule: &CoinRule, now: DateTime<Utc>) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO coin_rule (action, amount, max_per_day, max_per_month, cooldown_minutes, is_active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(action) DO UPDATE SET
                amount = excluded.amount,
                max_per_day = excluded.max_per_day,
                max_per_month = excluded.max_per_month,
                cooldown_minutes = excluded.cooldown_minutes,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
            params![
                rule.action,
                rule.amount,
                rule.max_per_day,
                rule.max_per_month,
                rule.cooldown_minutes,
                if rule.is_active { 1i64 } else { 0i64 },
                to_millis(now),
            ],
        )?;
        Ok(())
    }

    pub fn set_rule_active(&self, action: &str, is_active: bool, now: DateTime<Utc>) -> CoinResult<bool> {
        let changed = self.conn.execute(
            "UPDATE coin_rule SET is_active = ?1, updated_at = ?2 WHERE action = ?3",
            params![if is_active { 1i64 } else { 0i64 }, to_millis(now), action],
        )?;
        Ok(changed == 1)
    }

    // ── Action occurrences (cap and cooldown counters) ────────────

    pub fn insert_action_occurrence(
        &self,
        user_id: &str,
        action: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO coin_action_log (user_id, action, transaction_id, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, action, transaction_id, to_millis(at)],
        )?;
        Ok(())
    }

    /// Successful earns of `action` in `[start, end)`.
    pub fn count_actions_between(
        &self,
        user_id: &str,
        action: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoinResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM coin_action_log
             WHERE user_id = ?1 AND action = ?2 AND occurred_at >= ?3 AND occurred_at < ?4",
            params![user_id, action, to_millis(start), to_millis(end)],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn last_action_at(&self, user_id: &str, action: &str) -> CoinResult<Option<DateTime<Utc>>> {
        let last: Option<i64> = self.conn.query_row(
            "SELECT MAX(occurred_at) FROM coin_action_log WHERE user_id = ?1 AND action = ?2",
            params![user_id, action],
            |row| row.get(0),
        )?;
        Ok(last.map(from_millis))
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<CoinRule> {
    Ok(CoinRule {
        action:           row.get(0)?,
        amount:           row.get(1)?,
        max_per_day:      row.get(2)?,
        max_per_month:    row.get(3)?,
        cooldown_minutes: row.get(4)?,
        is_active:        row.get::<_, i64>(5)? != 0,
    })
}
