use super::{instant_col, json_col, to_millis, Db};
use crate::{
    error::CoinResult,
    ledger::{CoinTransaction, TransactionType, UserCoinAccount},
    types::Coins,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row};

impl Db<'_> {
    // ── Account ───────────────────────────────────────────────────

    pub fn ensure_account(&self, user_id: &str, now: DateTime<Utc>) -> CoinResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO coin_account (user_id, balance, total_earned, total_spent, version, updated_at)
             VALUES (?1, 0, 0, 0, 0, ?2)",
            params![user_id, to_millis(now)],
        )?;
        Ok(())
    }

    pub fn account(&self, user_id: &str) -> CoinResult<Option<UserCoinAccount>> {
        let account = self
            .conn
            .query_row(
                "SELECT user_id, balance, total_earned, total_spent, updated_at
                 FROM coin_account WHERE user_id = ?1",
                params![user_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn all_accounts(&self) -> CoinResult<Vec<UserCoinAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, balance, total_earned, total_spent, updated_at
             FROM coin_account ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map([], account_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn apply_credit(&self, user_id: &str, amount: Coins, now: DateTime<Utc>) -> CoinResult<()> {
        self.conn.execute(
            "UPDATE coin_account
             SET balance = balance + ?1, total_earned = total_earned + ?1,
                 version = version + 1, updated_at = ?2
             WHERE user_id = ?3",
            params![amount, to_millis(now), user_id],
        )?;
        Ok(())
    }

    /// Compare-and-decrement. Returns false (and changes nothing) when the
    /// balance does not cover `amount`.
    pub fn apply_debit(&self, user_id: &str, amount: Coins, now: DateTime<Utc>) -> CoinResult<bool> {
        let changed = self.conn.execute(
            "UPDATE coin_account
             SET balance = balance - ?1, total_spent = total_spent + ?1,
                 version = version + 1, updated_at = ?2
             WHERE user_id = ?3 AND balance >= ?1",
            params![amount, to_millis(now), user_id],
        )?;
        Ok(changed == 1)
    }

    // ── Transaction log ───────────────────────────────────────────

    pub fn insert_transaction(&self, tx: &CoinTransaction) -> CoinResult<()> {
        let metadata = tx.metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO coin_transaction (id, user_id, amount, tx_type, reason, description, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.id,
                tx.user_id,
                tx.amount,
                tx.tx_type.as_str(),
                tx.reason,
                tx.description,
                metadata,
                to_millis(tx.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn transactions_for_user(&self, user_id: &str, limit: usize) -> CoinResult<Vec<CoinTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, amount, tx_type, reason, description, metadata, created_at
             FROM coin_transaction WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], transaction_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// (sum of earned amounts, absolute sum of spent amounts) for a user.
    pub fn transaction_sums(&self, user_id: &str) -> CoinResult<(Coins, Coins)> {
        let sums = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN tx_type = 'earned' THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN tx_type = 'spent' THEN -amount ELSE 0 END), 0)
             FROM coin_transaction WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(sums)
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<UserCoinAccount> {
    Ok(UserCoinAccount {
        user_id:      row.get(0)?,
        balance:      row.get(1)?,
        total_earned: row.get(2)?,
        total_spent:  row.get(3)?,
        updated_at:   instant_col(row, 4)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<CoinTransaction> {
    let raw_type: String = row.get(3)?;
    let tx_type = TransactionType::parse(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown tx_type '{raw_type}'").into(),
        )
    })?;
    Ok(CoinTransaction {
        id:          row.get(0)?,
        user_id:     row.get(1)?,
        amount:      row.get(2)?,
        tx_type,
        reason:      row.get(4)?,
        description: row.get(5)?,
        metadata:    json_col(row, 6)?,
        created_at:  instant_col(row, 7)?,
    })
}
