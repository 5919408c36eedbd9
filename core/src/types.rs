//! Shared primitive types used across the coin engine.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// An already-authenticated storefront user.
pub type UserId = String;

/// A catalog product identifier.
pub type ProductId = String;

/// Whole coins. Ledger amounts are never fractional.
pub type Coins = i64;

/// Cooperative cancellation flag for earn and redeem requests.
///
/// The flag is checked right before the storage commit. Once a unit has
/// committed, cancelling the token has no effect on it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token nobody holds a handle to; it can never fire.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
