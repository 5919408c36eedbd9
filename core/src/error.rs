use crate::types::Coins;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business reasons an operation stopped without writing anything.
///
/// These are results, not faults: callers report them with `success=false`
/// and the reason code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("coin system is disabled")]
    SystemDisabled,

    #[error("no active rule for this action")]
    UnknownOrInactiveRule,

    #[error("earning cap reached for this period")]
    CapReached,

    #[error("action is cooling down")]
    Cooldown,

    #[error("too many attempts")]
    RateLimited,

    #[error("suspicious activity detected")]
    Suspicious,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("product not found")]
    ProductNotFound,

    #[error("product is not available")]
    ProductInactive,

    #[error("product is out of stock")]
    OutOfStock,

    #[error("code not found")]
    CodeNotFound,

    #[error("code has expired")]
    CodeExpired,

    #[error("code already claimed")]
    AlreadyClaimed,
}

impl Rejection {
    /// Stable reason code returned to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SystemDisabled        => "system_disabled",
            Self::UnknownOrInactiveRule => "unknown_or_inactive_rule",
            Self::CapReached            => "cap_reached",
            Self::Cooldown              => "cooldown",
            Self::RateLimited           => "rate_limited",
            Self::Suspicious            => "suspicious",
            Self::InsufficientBalance   => "insufficient_balance",
            Self::ProductNotFound       => "product_not_found",
            Self::ProductInactive       => "product_inactive",
            Self::OutOfStock            => "out_of_stock",
            Self::CodeNotFound          => "code_not_found",
            Self::CodeExpired           => "code_expired",
            Self::AlreadyClaimed        => "already_claimed",
        }
    }

    /// Expected outcomes mean "nothing happened". They are never logged
    /// above debug and never shown to the user as a failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::SystemDisabled
                | Self::CapReached
                | Self::Cooldown
                | Self::RateLimited
                | Self::AlreadyClaimed
        )
    }

    /// Message suitable for showing to the storefront user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::SystemDisabled        => "UTI Coins is temporarily unavailable.",
            Self::UnknownOrInactiveRule => "This action does not earn coins right now.",
            Self::CapReached            => "You already earned the maximum for this action.",
            Self::Cooldown              => "You can earn coins for this action again soon.",
            Self::RateLimited           => "Please slow down.",
            Self::Suspicious            => "Unusual activity detected. Try again later.",
            Self::InsufficientBalance   => "You do not have enough coins for this item.",
            Self::ProductNotFound       => "This item does not exist.",
            Self::ProductInactive       => "This item is not available right now.",
            Self::OutOfStock            => "This item is out of stock.",
            Self::CodeNotFound          => "Invalid code.",
            Self::CodeExpired           => "This code has expired.",
            Self::AlreadyClaimed        => "You already claimed this code.",
        }
    }
}

#[derive(Error, Debug)]
pub enum CoinError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("Request cancelled before commit")]
    Cancelled,

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Coins },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Rejected: {0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoinError {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<Rejection> for CoinError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

/// SQLite lock contention surfaces as a timeout, never as a generic fault.
impl From<rusqlite::Error> for CoinError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked) => Self::Timeout {
                operation: "sqlite lock",
            },
            _ => Self::Database(e),
        }
    }
}

pub type CoinResult<T> = Result<T, CoinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_sqlite_maps_to_timeout() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(CoinError::from(busy), CoinError::Timeout { .. }));
    }

    #[test]
    fn caps_and_rate_limits_are_expected_outcomes() {
        assert!(Rejection::CapReached.is_expected());
        assert!(Rejection::RateLimited.is_expected());
        assert!(!Rejection::Suspicious.is_expected());
        assert!(!Rejection::InsufficientBalance.is_expected());
        assert_eq!(Rejection::OutOfStock.code(), "out_of_stock");
    }
}
