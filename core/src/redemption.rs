//! Redemption engine: exchanges coin balance for catalog items.
//!
//! RULE: The debit, the stock decrement, the redemption record and the
//! event are one write unit. Stock never moves without a matching debit,
//! and a finite-stock product is never paid for without its decrement.

use crate::{
    clock::TimeSource,
    earning::log_rejection,
    error::{CoinError, CoinResult, Rejection},
    event::{CoinEvent, EventLogEntry},
    ledger::{Ledger, Posting},
    store::CoinStore,
    system_toggle::SystemToggle,
    types::{CancelToken, Coins, ProductId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinProduct {
    pub id:            ProductId,
    pub name:          String,
    pub cost:          Coins,
    /// None means unlimited.
    #[serde(default)]
    pub stock:         Option<i64>,
    pub product_type:  String,
    #[serde(default = "default_active")]
    pub is_active:     bool,
    #[serde(default)]
    pub display_order: i64,
}

fn default_active() -> bool {
    true
}

impl CoinProduct {
    pub fn in_stock(&self) -> bool {
        self.stock.map_or(true, |s| s > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub id:             String,
    pub user_id:        UserId,
    pub product_id:     ProductId,
    pub transaction_id: String,
    pub cost_paid:      Coins,
    pub created_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    pub success:         bool,
    pub product_id:      ProductId,
    pub cost_paid:       Coins,
    pub balance:         Option<Coins>,
    /// Stock left after this redemption; None for unlimited products.
    pub remaining_stock: Option<i64>,
    pub redemption_id:   Option<String>,
    pub transaction_id:  Option<String>,
    pub reason:          Option<Rejection>,
    pub message:         String,
}

impl RedemptionOutcome {
    fn rejected(product_id: &str, reason: Rejection) -> Self {
        Self {
            success:         false,
            product_id:      product_id.to_string(),
            cost_paid:       0,
            balance:         None,
            remaining_stock: None,
            redemption_id:   None,
            transaction_id:  None,
            reason:          Some(reason),
            message:         reason.user_message().to_string(),
        }
    }
}

pub struct RedemptionEngine {
    store:  Arc<CoinStore>,
    time:   Arc<dyn TimeSource>,
    toggle: Arc<SystemToggle>,
}

impl RedemptionEngine {
    pub fn new(store: Arc<CoinStore>, time: Arc<dyn TimeSource>, toggle: Arc<SystemToggle>) -> Self {
        Self { store, time, toggle }
    }

    pub fn redeem(
        &self,
        user_id: &str,
        product_id: &str,
        cancel: &CancelToken,
    ) -> CoinResult<RedemptionOutcome> {
        match self.try_redeem(user_id, product_id, cancel) {
            Err(CoinError::Rejected(reason)) => {
                log_rejection("redeem", user_id, product_id, reason);
                Ok(RedemptionOutcome::rejected(product_id, reason))
            }
            other => other,
        }
    }

    fn try_redeem(
        &self,
        user_id: &str,
        product_id: &str,
        cancel: &CancelToken,
    ) -> CoinResult<RedemptionOutcome> {
        self.toggle.ensure_enabled()?;
        let now = self.time.now();

        let outcome = self.store.write_cancellable("redeem", cancel, |db| {
            let product = db.product(product_id)?.ok_or(Rejection::ProductNotFound)?;
            if !product.is_active {
                return Err(Rejection::ProductInactive.into());
            }
            if !product.in_stock() {
                return Err(Rejection::OutOfStock.into());
            }

            let description = format!("Redeemed {}", product.name);
            let posting = Posting::new(user_id, product.cost, product_id).description(&description);
            let tx = Ledger::debit_in(db, posting, now)?;

            let remaining_stock = match product.stock {
                Some(stock) => {
                    // Another redeemer may have taken the last unit since the read.
                    if !db.decrement_stock(product_id, now)? {
                        return Err(Rejection::OutOfStock.into());
                    }
                    Some(stock - 1)
                }
                None => None,
            };

            let record = RedemptionRecord {
                id:             Uuid::new_v4().to_string(),
                user_id:        user_id.to_string(),
                product_id:     product_id.to_string(),
                transaction_id: tx.transaction_id.clone(),
                cost_paid:      product.cost,
                created_at:     now,
            };
            db.insert_redemption(&record)?;

            let event = CoinEvent::CoinsSpent {
                user_id:        user_id.to_string(),
                product_id:     product_id.to_string(),
                amount:         product.cost,
                transaction_id: tx.transaction_id.clone(),
                redemption_id:  record.id.clone(),
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)?;

            Ok(RedemptionOutcome {
                success:         true,
                product_id:      product_id.to_string(),
                cost_paid:       product.cost,
                balance:         Some(tx.balance),
                remaining_stock,
                redemption_id:   Some(record.id),
                transaction_id:  Some(tx.transaction_id),
                reason:          None,
                message:         format!("You redeemed {}.", product.name),
            })
        })?;

        log::info!(
            "redeem: {user_id} bought {product_id} for {} (balance={:?})",
            outcome.cost_paid, outcome.balance
        );
        Ok(outcome)
    }

    pub fn product(&self, product_id: &str) -> CoinResult<Option<CoinProduct>> {
        self.store.read("products.get", |db| db.product(product_id))
    }

    /// Active products, ordered for display.
    pub fn products(&self) -> CoinResult<Vec<CoinProduct>> {
        self.store.read("products.list", |db| db.active_products())
    }

    pub fn history(&self, user_id: &str) -> CoinResult<Vec<RedemptionRecord>> {
        self.store
            .read("redeem.history", |db| db.redemptions_for_user(user_id))
    }

    pub fn upsert_product(&self, product: &CoinProduct) -> CoinResult<()> {
        if product.cost <= 0 {
            return Err(CoinError::InvalidAmount { amount: product.cost });
        }
        if let Some(stock) = product.stock.filter(|s| *s < 0) {
            return Err(CoinError::InvalidAmount { amount: stock });
        }
        let now = self.time.now();
        self.store.write("products.upsert", |db| {
            db.upsert_product(product, now)?;
            let event = CoinEvent::ProductUpdated {
                product_id: product.id.clone(),
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)
        })?;
        log::info!("products: upserted '{}' cost={} stock={:?}", product.id, product.cost, product.stock);
        Ok(())
    }
}
