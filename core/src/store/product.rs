use super::{instant_col, to_millis, Db};
use crate::{
    error::CoinResult,
    redemption::{CoinProduct, RedemptionRecord},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

impl Db<'_> {
    // ── Products ──────────────────────────────────────────────────

    pub fn product(&self, product_id: &str) -> CoinResult<Option<CoinProduct>> {
        let product = self
            .conn
            .query_row(
                "SELECT id, name, cost, stock, product_type, is_active, display_order
                 FROM coin_product WHERE id = ?1",
                params![product_id],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    /// Active products in display order.
    pub fn active_products(&self) -> CoinResult<Vec<CoinProduct>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, cost, stock, product_type, is_active, display_order
             FROM coin_product WHERE is_active = 1
             ORDER BY display_order ASC, id ASC",
        )?;
        let products = stmt
            .query_map([], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    pub fn upsert_product(&self, product: &CoinProduct, now: DateTime<Utc>) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO coin_product (id, name, cost, stock, product_type, is_active, display_order, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                cost = excluded.cost,
                stock = excluded.stock,
                product_type = excluded.product_type,
                is_active = excluded.is_active,
                display_order = excluded.display_order,
                updated_at = excluded.updated_at",
            params![
                product.id,
                product.name,
                product.cost,
                product.stock,
                product.product_type,
                if product.is_active { 1i64 } else { 0i64 },
                product.display_order,
                to_millis(now),
            ],
        )?;
        Ok(())
    }

    /// Compare-and-decrement on finite stock. Returns false when the
    /// product has unlimited stock or none left.
    pub fn decrement_stock(&self, product_id: &str, now: DateTime<Utc>) -> CoinResult<bool> {
        let changed = self.conn.execute(
            "UPDATE coin_product SET stock = stock - 1, updated_at = ?1
             WHERE id = ?2 AND stock IS NOT NULL AND stock > 0",
            params![to_millis(now), product_id],
        )?;
        Ok(changed == 1)
    }

    // ── Redemptions ───────────────────────────────────────────────

    pub fn insert_redemption(&self, record: &RedemptionRecord) -> CoinResult<()> {
        self.conn.execute(
            "INSERT INTO redemption_record (id, user_id, product_id, transaction_id, cost_paid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.user_id,
                record.product_id,
                record.transaction_id,
                record.cost_paid,
                to_millis(record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn redemptions_for_user(&self, user_id: &str) -> CoinResult<Vec<RedemptionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, product_id, transaction_id, cost_paid, created_at
             FROM redemption_record WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let records = stmt
            .query_map(params![user_id], |row| {
                Ok(RedemptionRecord {
                    id:             row.get(0)?,
                    user_id:        row.get(1)?,
                    product_id:     row.get(2)?,
                    transaction_id: row.get(3)?,
                    cost_paid:      row.get(4)?,
                    created_at:     instant_col(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn redemption_count_for_product(&self, product_id: &str) -> CoinResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM redemption_record WHERE product_id = ?1",
            params![product_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Redemptions whose linked transaction is missing, belongs to another
    /// user, or does not debit exactly `cost_paid`.
    pub fn unmatched_redemptions(&self, user_id: &str) -> CoinResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id FROM redemption_record r
             LEFT JOIN coin_transaction t ON t.id = r.transaction_id
             WHERE r.user_id = ?1
               AND (t.id IS NULL OR t.user_id != r.user_id OR t.tx_type != 'spent' OR t.amount != -r.cost_paid)
             ORDER BY r.created_at ASC",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<CoinProduct> {
    Ok(CoinProduct {
        id:            row.get(0)?,
        name:          row.get(1)?,
        cost:          row.get(2)?,
        stock:         row.get(3)?,
        product_type:  row.get(4)?,
        is_active:     row.get::<_, i64>(5)? != 0,
        display_order: row.get(6)?,
    })
}
