//! Reconciliation: checks every account against its transaction log.
//!
//! Per user:
//!   - balance == total_earned - total_spent, balance >= 0
//!   - total_earned == sum(earned transactions)
//!   - total_spent  == -sum(spent transactions)
//!   - every redemption links a spent transaction of exactly its cost
//!
//! Read-only. A discrepancy is reported, never repaired here.

use crate::{
    error::CoinResult,
    ledger::UserCoinAccount,
    store::{CoinStore, Db},
    types::{Coins, UserId},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    BalanceMismatch {
        balance:      Coins,
        total_earned: Coins,
        total_spent:  Coins,
    },
    NegativeBalance {
        balance: Coins,
    },
    EarnedMismatch {
        recorded: Coins,
        logged:   Coins,
    },
    SpentMismatch {
        recorded: Coins,
        logged:   Coins,
    },
    UnmatchedRedemption {
        redemption_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReconciliation {
    pub user_id:       UserId,
    pub balance:       Coins,
    pub discrepancies: Vec<Discrepancy>,
}

impl UserReconciliation {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub accounts_checked: u32,
    pub total_balance:    Coins,
    pub exceptions:       Vec<UserReconciliation>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.exceptions.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<CoinStore>,
}

impl Reconciler {
    pub fn new(store: Arc<CoinStore>) -> Self {
        Self { store }
    }

    /// None when the user has never held an account.
    pub fn reconcile_user(&self, user_id: &str) -> CoinResult<Option<UserReconciliation>> {
        self.store.read("reconcile.user", |db| {
            db.account(user_id)?
                .map(|account| Self::check(db, &account))
                .transpose()
        })
    }

    pub fn reconcile_all(&self) -> CoinResult<ReconciliationReport> {
        let report = self.store.read("reconcile.all", |db| {
            let mut report = ReconciliationReport::default();
            for account in db.all_accounts()? {
                report.accounts_checked += 1;
                report.total_balance += account.balance;
                let result = Self::check(db, &account)?;
                if !result.is_clean() {
                    report.exceptions.push(result);
                }
            }
            Ok(report)
        })?;

        if report.is_clean() {
            log::info!("reconcile: {} accounts clean", report.accounts_checked);
        } else {
            for exception in &report.exceptions {
                log::warn!(
                    "reconcile: {} has {} discrepancies: {:?}",
                    exception.user_id,
                    exception.discrepancies.len(),
                    exception.discrepancies
                );
            }
        }
        Ok(report)
    }

    fn check(db: &Db<'_>, account: &UserCoinAccount) -> CoinResult<UserReconciliation> {
        let mut discrepancies = Vec::new();

        if account.balance != account.total_earned - account.total_spent {
            discrepancies.push(Discrepancy::BalanceMismatch {
                balance:      account.balance,
                total_earned: account.total_earned,
                total_spent:  account.total_spent,
            });
        }
        if account.balance < 0 {
            discrepancies.push(Discrepancy::NegativeBalance { balance: account.balance });
        }

        let (earned, spent) = db.transaction_sums(&account.user_id)?;
        if earned != account.total_earned {
            discrepancies.push(Discrepancy::EarnedMismatch {
                recorded: account.total_earned,
                logged:   earned,
            });
        }
        if spent != account.total_spent {
            discrepancies.push(Discrepancy::SpentMismatch {
                recorded: account.total_spent,
                logged:   spent,
            });
        }

        for redemption_id in db.unmatched_redemptions(&account.user_id)? {
            discrepancies.push(Discrepancy::UnmatchedRedemption { redemption_id });
        }

        Ok(UserReconciliation {
            user_id: account.user_id.clone(),
            balance: account.balance,
            discrepancies,
        })
    }
}
