//! UTI Coins: the storefront's loyalty coin engine.
//!
//! Users earn coins through actions (daily login, scrolling, purchases,
//! daily codes) and spend them on reward products. Every balance change
//! goes through the ledger in one storage transaction.

pub mod anti_abuse;
pub mod cache;
pub mod clock;
pub mod command;
pub mod config;
pub mod daily_code;
pub mod earning;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod reconciliation;
pub mod redemption;
pub mod rng;
pub mod rule_registry;
pub mod store;
pub mod streak_tracker;
pub mod system_toggle;
pub mod types;
