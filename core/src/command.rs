use crate::{
    config::StreakConfig,
    earning::EarnRequest,
    engine::CoinEngine,
    error::{CoinError, CoinResult, Rejection},
    redemption::CoinProduct,
    rule_registry::CoinRule,
    types::{Coins, ProductId, UserId},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_limit() -> usize {
    50
}

/// Every operation the runner accepts, one JSON object per line.
/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EngineCommand {
    // ── Storefront ────────────────────────────────
    Earn {
        user_id:     UserId,
        action:      String,
        #[serde(default)]
        amount:      Option<Coins>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        metadata:    Option<Value>,
    },
    Spend {
        user_id:    UserId,
        product_id: ProductId,
    },
    DailyLogin {
        user_id: UserId,
    },
    DailyTimer {
        user_id: UserId,
    },
    ActionTimer {
        user_id: UserId,
        action:  String,
    },
    RewardPeriod,
    CurrentCode,
    StreakStatus {
        user_id: UserId,
    },
    ClaimCode {
        user_id: UserId,
        code:    String,
    },
    ClaimDailyBonus {
        user_id: UserId,
    },
    LoginStreak {
        user_id: UserId,
    },
    Balance {
        user_id: UserId,
    },
    History {
        user_id: UserId,
        #[serde(default = "default_limit")]
        limit:   usize,
    },
    Redemptions {
        user_id: UserId,
    },
    Products,

    // ── Administration ────────────────────────────
    UpsertRule {
        rule: CoinRule,
    },
    SetRuleActive {
        action:    String,
        is_active: bool,
    },
    Rules,
    UpsertProduct {
        product: CoinProduct,
    },
    SetSystemEnabled {
        enabled: bool,
    },
    SetStreakConfig {
        config: StreakConfig,
    },
    ResetGuard {
        user_id: UserId,
        action:  String,
    },
    SweepGuard,

    // ── Audit ─────────────────────────────────────
    ReconcileUser {
        user_id: UserId,
    },
    ReconcileAll,
    SuspiciousFlags {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    Events {
        user_id: UserId,
    },
}

/// One reply line. `reason` is set for business rejections, `error` for
/// faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok:     bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data:   Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:  Option<String>,
}

impl CommandResponse {
    pub fn from_result(result: CoinResult<Value>) -> Self {
        match result {
            Ok(data) => Self { ok: true, data: Some(data), reason: None, error: None },
            Err(CoinError::Rejected(reason)) => Self {
                ok:     false,
                data:   None,
                reason: Some(reason),
                error:  Some(reason.user_message().to_string()),
            },
            Err(e) => Self { ok: false, data: None, reason: None, error: Some(e.to_string()) },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { ok: false, data: None, reason: None, error: Some(message.into()) }
    }
}

impl CoinEngine {
    /// Execute one command and encode its result as JSON.
    pub fn dispatch(&self, command: EngineCommand) -> CoinResult<Value> {
        let value = match command {
            EngineCommand::Earn { user_id, action, amount, description, metadata } => {
                let req = EarnRequest { user_id, action, amount, description, metadata };
                serde_json::to_value(self.earn_coins(&req)?)?
            }
            EngineCommand::Spend { user_id, product_id } => {
                serde_json::to_value(self.spend_coins(&user_id, &product_id)?)?
            }
            EngineCommand::DailyLogin { user_id } => {
                serde_json::to_value(self.process_daily_login(&user_id)?)?
            }
            EngineCommand::DailyTimer { user_id } => {
                serde_json::to_value(self.get_daily_timer(&user_id)?)?
            }
            EngineCommand::ActionTimer { user_id, action } => {
                serde_json::to_value(self.get_action_timer(&user_id, &action)?)?
            }
            EngineCommand::RewardPeriod => serde_json::to_value(self.reward_period()?)?,
            EngineCommand::CurrentCode => serde_json::to_value(self.get_current_code()?)?,
            EngineCommand::StreakStatus { user_id } => {
                serde_json::to_value(self.get_streak_status(&user_id)?)?
            }
            EngineCommand::ClaimCode { user_id, code } => {
                serde_json::to_value(self.claim_code(&user_id, &code)?)?
            }
            EngineCommand::ClaimDailyBonus { user_id } => {
                serde_json::to_value(self.claim_daily_bonus(&user_id)?)?
            }
            EngineCommand::LoginStreak { user_id } => {
                serde_json::to_value(self.get_login_streak(&user_id)?)?
            }
            EngineCommand::Balance { user_id } => serde_json::to_value(self.get_balance(&user_id)?)?,
            EngineCommand::History { user_id, limit } => {
                serde_json::to_value(self.transaction_history(&user_id, limit)?)?
            }
            EngineCommand::Redemptions { user_id } => {
                serde_json::to_value(self.redemption_history(&user_id)?)?
            }
            EngineCommand::Products => serde_json::to_value(self.list_products()?)?,

            EngineCommand::UpsertRule { rule } => {
                self.upsert_rule(&rule)?;
                serde_json::to_value(&rule)?
            }
            EngineCommand::SetRuleActive { action, is_active } => {
                serde_json::json!({ "updated": self.set_rule_active(&action, is_active)? })
            }
            EngineCommand::Rules => serde_json::to_value(self.list_rules()?)?,
            EngineCommand::UpsertProduct { product } => {
                self.upsert_product(&product)?;
                serde_json::to_value(&product)?
            }
            EngineCommand::SetSystemEnabled { enabled } => {
                self.set_system_enabled(enabled)?;
                serde_json::json!({ "enabled": enabled })
            }
            EngineCommand::SetStreakConfig { config } => {
                self.set_streak_config(config)?;
                serde_json::to_value(config)?
            }
            EngineCommand::ResetGuard { user_id, action } => {
                self.reset_guard(&user_id, &action);
                serde_json::json!({ "user_id": user_id, "action": action })
            }
            EngineCommand::SweepGuard => serde_json::json!({ "removed": self.sweep_guard() }),

            EngineCommand::ReconcileUser { user_id } => {
                serde_json::to_value(self.reconcile_user(&user_id)?)?
            }
            EngineCommand::ReconcileAll => serde_json::to_value(self.reconcile_all()?)?,
            EngineCommand::SuspiciousFlags { user_id } => {
                serde_json::to_value(self.suspicious_flags(user_id.as_deref())?)?
            }
            EngineCommand::Events { user_id } => {
                serde_json::to_value(self.events_for_user(&user_id)?)?
            }
        };
        Ok(value)
    }
}
