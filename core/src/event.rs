//! Engine audit events.
//!
//! RULE: Every state-changing engine operation appends exactly one event
//! in the same storage unit as the change it describes.
//! Variants are added over time, never removed or reordered.

use crate::types::{Coins, ProductId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoinEvent {
    // ── Ledger ─────────────────────────────────────
    CoinsEarned {
        user_id:        UserId,
        action:         String,
        amount:         Coins,
        multiplier:     f64,
        transaction_id: String,
    },
    CoinsSpent {
        user_id:        UserId,
        product_id:     ProductId,
        amount:         Coins,
        transaction_id: String,
        redemption_id:  String,
    },

    // ── Streaks and codes ──────────────────────────
    StreakCheckedIn {
        user_id:        UserId,
        reward_date:    NaiveDate,
        current_streak: u32,
        multiplier:     f64,
    },
    DailyCodeIssued {
        code:        String,
        reward_date: NaiveDate,
    },
    CodeClaimed {
        user_id:         UserId,
        code:            String,
        streak_position: u32,
    },

    // ── Abuse ──────────────────────────────────────
    SuspiciousActivity {
        user_id:     UserId,
        action:      String,
        attempts:    u32,
        window_secs: u64,
    },

    // ── Administration ─────────────────────────────
    RuleUpdated {
        action:    String,
        is_active: bool,
    },
    ProductUpdated {
        product_id: ProductId,
    },
    SystemToggled {
        enabled: bool,
    },
    StreakConfigUpdated {
        max_multiplier:       f64,
        multiplier_increment: f64,
    },
}

impl CoinEvent {
    /// Stable name for the event_type column.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CoinsEarned { .. }         => "coins_earned",
            Self::CoinsSpent { .. }          => "coins_spent",
            Self::StreakCheckedIn { .. }     => "streak_checked_in",
            Self::DailyCodeIssued { .. }     => "daily_code_issued",
            Self::CodeClaimed { .. }         => "code_claimed",
            Self::SuspiciousActivity { .. }  => "suspicious_activity",
            Self::RuleUpdated { .. }         => "rule_updated",
            Self::ProductUpdated { .. }      => "product_updated",
            Self::SystemToggled { .. }       => "system_toggled",
            Self::StreakConfigUpdated { .. } => "streak_config_updated",
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::CoinsEarned { user_id, .. }
            | Self::CoinsSpent { user_id, .. }
            | Self::StreakCheckedIn { user_id, .. }
            | Self::CodeClaimed { user_id, .. }
            | Self::SuspiciousActivity { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// A persisted row from the engine_event table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub event_type: String,
    pub user_id:    Option<UserId>,
    pub payload:    String,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn from_event(event: &CoinEvent, at: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id:         None,
            event_type: event.event_type().to_string(),
            user_id:    event.user_id().map(str::to_string),
            payload:    serde_json::to_string(event)?,
            created_at: at,
        })
    }

    pub fn decode(&self) -> serde_json::Result<CoinEvent> {
        serde_json::from_str(&self.payload)
    }
}
