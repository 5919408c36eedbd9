//! Ledger: per-user balances plus the append-only transaction log.
//!
//! RULES:
//!   - Every balance change appends exactly one CoinTransaction in the same
//!     storage unit. There are no orphan transactions and no silent deltas.
//!   - `balance == total_earned - total_spent` and `balance >= 0`, always.
//!     The schema enforces both as CHECK constraints as well.
//!   - Debits are compare-and-decrement (`WHERE balance >= amount`), so two
//!     concurrent debits can never both spend the same coins.

use crate::{
    clock::TimeSource,
    error::{CoinError, CoinResult, Rejection},
    store::{CoinStore, Db},
    types::{Coins, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Earned,
    Spent,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Spent  => "spent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "earned" => Some(Self::Earned),
            "spent"  => Some(Self::Spent),
            _        => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCoinAccount {
    pub user_id:      UserId,
    pub balance:      Coins,
    pub total_earned: Coins,
    pub total_spent:  Coins,
    pub updated_at:   DateTime<Utc>,
}

impl UserCoinAccount {
    pub fn is_consistent(&self) -> bool {
        self.balance >= 0 && self.balance == self.total_earned - self.total_spent
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinTransaction {
    pub id:          String,
    pub user_id:     UserId,
    /// Signed: positive for earned, negative for spent.
    pub amount:      Coins,
    pub tx_type:     TransactionType,
    /// Rule action for earnings, product id for redemptions.
    pub reason:      String,
    pub description: Option<String>,
    pub metadata:    Option<serde_json::Value>,
    pub created_at:  DateTime<Utc>,
}

/// One requested balance movement. `amount` is always positive; the
/// direction comes from whether it is credited or debited.
#[derive(Debug, Clone, Copy)]
pub struct Posting<'a> {
    pub user_id:     &'a str,
    pub amount:      Coins,
    pub reason:      &'a str,
    pub description: Option<&'a str>,
    pub metadata:    Option<&'a serde_json::Value>,
}

impl<'a> Posting<'a> {
    pub fn new(user_id: &'a str, amount: Coins, reason: &'a str) -> Self {
        Self {
            user_id,
            amount,
            reason,
            description: None,
            metadata: None,
        }
    }

    pub fn description(mut self, description: &'a str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn metadata(mut self, metadata: &'a serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: String,
    /// Signed amount as written to the log.
    pub amount:         Coins,
    pub balance:        Coins,
    pub total_earned:   Coins,
    pub total_spent:    Coins,
}

pub struct Ledger {
    store: Arc<CoinStore>,
    time:  Arc<dyn TimeSource>,
}

impl Ledger {
    pub fn new(store: Arc<CoinStore>, time: Arc<dyn TimeSource>) -> Self {
        Self { store, time }
    }

    pub fn credit(&self, posting: Posting<'_>) -> CoinResult<TransactionResult> {
        let now = self.time.now();
        self.store
            .write("ledger.credit", |db| Self::credit_in(db, posting, now))
    }

    pub fn debit(&self, posting: Posting<'_>) -> CoinResult<TransactionResult> {
        let now = self.time.now();
        self.store
            .write("ledger.debit", |db| Self::debit_in(db, posting, now))
    }

    /// Returns the account, creating a zero-balance one on first access.
    pub fn get_account(&self, user_id: &str) -> CoinResult<UserCoinAccount> {
        if let Some(account) = self.store.read("ledger.account", |db| db.account(user_id))? {
            return Ok(account);
        }
        let now = self.time.now();
        self.store.write("ledger.open_account", |db| {
            db.ensure_account(user_id, now)?;
            Self::load_account(db, user_id)
        })
    }

    /// Most recent transactions first.
    pub fn history(&self, user_id: &str, limit: usize) -> CoinResult<Vec<CoinTransaction>> {
        self.store
            .read("ledger.history", |db| db.transactions_for_user(user_id, limit))
    }

    /// Credit inside an existing write unit.
    pub(crate) fn credit_in(
        db: &Db<'_>,
        posting: Posting<'_>,
        now: DateTime<Utc>,
    ) -> CoinResult<TransactionResult> {
        if posting.amount <= 0 {
            return Err(CoinError::InvalidAmount { amount: posting.amount });
        }
        db.ensure_account(posting.user_id, now)?;
        db.apply_credit(posting.user_id, posting.amount, now)?;
        let tx = Self::append(db, posting, TransactionType::Earned, now)?;
        let account = Self::load_account(db, posting.user_id)?;

        log::info!(
            "ledger: +{} to {} ({}) balance={}",
            posting.amount, posting.user_id, posting.reason, account.balance
        );
        Ok(Self::result(tx, account))
    }

    /// Debit inside an existing write unit. Fails with `InsufficientBalance`
    /// before writing anything when the balance does not cover `amount`.
    pub(crate) fn debit_in(
        db: &Db<'_>,
        posting: Posting<'_>,
        now: DateTime<Utc>,
    ) -> CoinResult<TransactionResult> {
        if posting.amount <= 0 {
            return Err(CoinError::InvalidAmount { amount: posting.amount });
        }
        db.ensure_account(posting.user_id, now)?;
        if !db.apply_debit(posting.user_id, posting.amount, now)? {
            return Err(Rejection::InsufficientBalance.into());
        }
        let tx = Self::append(db, posting, TransactionType::Spent, now)?;
        let account = Self::load_account(db, posting.user_id)?;

        log::info!(
            "ledger: -{} from {} ({}) balance={}",
            posting.amount, posting.user_id, posting.reason, account.balance
        );
        Ok(Self::result(tx, account))
    }

    fn append(
        db: &Db<'_>,
        posting: Posting<'_>,
        tx_type: TransactionType,
        now: DateTime<Utc>,
    ) -> CoinResult<CoinTransaction> {
        let signed = match tx_type {
            TransactionType::Earned => posting.amount,
            TransactionType::Spent  => -posting.amount,
        };
        let tx = CoinTransaction {
            id:          Uuid::new_v4().to_string(),
            user_id:     posting.user_id.to_string(),
            amount:      signed,
            tx_type,
            reason:      posting.reason.to_string(),
            description: posting.description.map(str::to_string),
            metadata:    posting.metadata.cloned(),
            created_at:  now,
        };
        db.insert_transaction(&tx)?;
        Ok(tx)
    }

    fn load_account(db: &Db<'_>, user_id: &str) -> CoinResult<UserCoinAccount> {
        db.account(user_id)?
            .ok_or_else(|| anyhow::anyhow!("account {user_id} missing after open").into())
    }

    fn result(tx: CoinTransaction, account: UserCoinAccount) -> TransactionResult {
        TransactionResult {
            transaction_id: tx.id,
            amount:         tx.amount,
            balance:        account.balance,
            total_earned:   account.total_earned,
            total_spent:    account.total_spent,
        }
    }
}
