//! Earning orchestrator: the earn entry point.
//!
//! Gates, in order, each one final:
//!   1. system toggle
//!   2. anti-abuse guard
//!   3. active rule for the action
//!   4. per-day and per-month caps
//!   5. rule cooldown since the last successful earn
//!   6. streak multiplier → round(base × multiplier)
//!   7. ledger credit + action occurrence + event, one write unit
//!
//! Steps 4 through 7 run inside the same write transaction, so two
//! concurrent requests can never both pass a cap.

use crate::{
    anti_abuse::{AntiAbuseGuard, GuardVerdict},
    clock::{RewardClock, TimeSource},
    config::StreakConfig,
    error::{CoinError, CoinResult, Rejection},
    event::{CoinEvent, EventLogEntry},
    ledger::{Ledger, Posting},
    rule_registry::{CoinRule, RuleRegistry},
    store::{CoinStore, Db, SuspiciousFlag},
    streak_tracker::{CheckInOutcome, StreakTracker},
    system_toggle::SystemToggle,
    types::{CancelToken, Coins, UserId},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnRequest {
    pub user_id:     UserId,
    pub action:      String,
    /// Overrides the rule amount. The multiplier still applies.
    #[serde(default)]
    pub amount:      Option<Coins>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata:    Option<serde_json::Value>,
}

impl EarnRequest {
    pub fn new(user_id: &str, action: &str) -> Self {
        Self {
            user_id:     user_id.to_string(),
            action:      action.to_string(),
            amount:      None,
            description: None,
            metadata:    None,
        }
    }

    pub fn amount(mut self, amount: Coins) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnOutcome {
    pub success:              bool,
    pub amount:               Coins,
    pub multiplier:           f64,
    pub transaction_id:       Option<String>,
    pub balance:              Option<Coins>,
    /// None when the rule has no daily cap.
    pub remaining_today:      Option<u32>,
    pub remaining_this_month: Option<u32>,
    pub reason:               Option<Rejection>,
    pub message:              Option<String>,
}

impl EarnOutcome {
    pub fn rejected(reason: Rejection) -> Self {
        Self {
            success:              false,
            amount:               0,
            multiplier:           1.0,
            transaction_id:       None,
            balance:              None,
            remaining_today:      None,
            remaining_this_month: None,
            reason:               Some(reason),
            message:              Some(reason.user_message().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLoginOutcome {
    pub success:        bool,
    pub coins_earned:   Coins,
    pub streak:         u32,
    pub longest_streak: u32,
    pub multiplier:     f64,
    pub transaction_id: Option<String>,
    pub reason:         Option<Rejection>,
    pub message:        Option<String>,
}

impl DailyLoginOutcome {
    fn rejected(reason: Rejection) -> Self {
        Self {
            success:        false,
            coins_earned:   0,
            streak:         0,
            longest_streak: 0,
            multiplier:     1.0,
            transaction_id: None,
            reason:         Some(reason),
            message:        Some(reason.user_message().to_string()),
        }
    }
}

/// Claim eligibility for a once-per-reward-day action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTimer {
    pub can_claim:    bool,
    pub period_start: DateTime<Utc>,
    pub period_end:   DateTime<Utc>,
    pub next_reset:   DateTime<Utc>,
    pub last_claim:   Option<DateTime<Utc>>,
}

pub struct EarningOrchestrator {
    store:              Arc<CoinStore>,
    time:               Arc<dyn TimeSource>,
    clock:              RewardClock,
    toggle:             Arc<SystemToggle>,
    guard:              Arc<AntiAbuseGuard>,
    rules:              Arc<RuleRegistry>,
    streaks:            Arc<StreakTracker>,
    daily_login_action: String,
}

impl EarningOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CoinStore>,
        time: Arc<dyn TimeSource>,
        clock: RewardClock,
        toggle: Arc<SystemToggle>,
        guard: Arc<AntiAbuseGuard>,
        rules: Arc<RuleRegistry>,
        streaks: Arc<StreakTracker>,
        daily_login_action: String,
    ) -> Self {
        Self {
            store,
            time,
            clock,
            toggle,
            guard,
            rules,
            streaks,
            daily_login_action,
        }
    }

    pub fn daily_login_action(&self) -> &str {
        &self.daily_login_action
    }

    pub fn streak_config(&self) -> CoinResult<StreakConfig> {
        self.streaks.config()
    }

    pub fn earn(&self, req: &EarnRequest, cancel: &CancelToken) -> CoinResult<EarnOutcome> {
        let now = self.time.now();
        let result = self.try_earn(req, cancel, now);
        match result {
            Err(CoinError::Rejected(reason)) => {
                log_rejection("earn", &req.user_id, &req.action, reason);
                Ok(EarnOutcome::rejected(reason))
            }
            other => other,
        }
    }

    fn try_earn(
        &self,
        req: &EarnRequest,
        cancel: &CancelToken,
        now: DateTime<Utc>,
    ) -> CoinResult<EarnOutcome> {
        self.toggle.ensure_enabled()?;
        self.screen(&req.user_id, &req.action, now)?;
        let rule = self.rules.require(&req.action)?;
        let streak_config = self.streaks.config()?;
        let today = self.clock.reward_date(now);
        let clock = self.clock;

        self.store.write_cancellable("earn", cancel, |db| {
            let multiplier = StreakTracker::multiplier_in(db, &req.user_id, today, &streak_config)?;
            Self::credit_action_in(db, &clock, &rule, req, multiplier, now)
        })
    }

    /// Check in the user's login streak and credit the daily-login reward
    /// with the multiplier the check-in unlocked.
    ///
    /// The streak advances even when the reward itself is capped or
    /// missing; a second call in the same reward-day changes nothing.
    pub fn daily_login(&self, user_id: &str) -> CoinResult<DailyLoginOutcome> {
        let now = self.time.now();
        match self.try_daily_login(user_id, now) {
            Err(CoinError::Rejected(reason)) => {
                log_rejection("daily_login", user_id, &self.daily_login_action, reason);
                Ok(DailyLoginOutcome::rejected(reason))
            }
            other => other,
        }
    }

    fn try_daily_login(&self, user_id: &str, now: DateTime<Utc>) -> CoinResult<DailyLoginOutcome> {
        self.toggle.ensure_enabled()?;
        self.screen(user_id, &self.daily_login_action, now)?;
        let rule = self.rules.resolve(&self.daily_login_action)?;
        let streak_config = self.streaks.config()?;
        let today = self.clock.reward_date(now);
        let clock = self.clock;
        let action = self.daily_login_action.as_str();

        self.store.write("daily_login", |db| {
            let check_in = StreakTracker::check_in_in(db, user_id, today, &streak_config, now)?;
            let streak = &check_in.streak;
            let multiplier = streak.effective_multiplier(today, &streak_config);
            let mut outcome = DailyLoginOutcome {
                success:        true,
                coins_earned:   0,
                streak:         streak.current_streak,
                longest_streak: streak.longest_streak,
                multiplier,
                transaction_id: None,
                reason:         None,
                message:        None,
            };

            if check_in.outcome == CheckInOutcome::AlreadyCheckedIn {
                outcome.success = false;
                outcome.reason = Some(Rejection::CapReached);
                outcome.message = Some("You already checked in today.".to_string());
                return Ok(outcome);
            }

            let Some(rule) = rule else {
                outcome.message = Some(format!("Day {} streak!", streak.current_streak));
                return Ok(outcome);
            };
            let req = EarnRequest::new(user_id, action).description("Daily login");
            match Self::credit_action_in(db, &clock, &rule, &req, multiplier, now) {
                Ok(earned) => {
                    outcome.coins_earned = earned.amount;
                    outcome.transaction_id = earned.transaction_id;
                    outcome.message = Some(format!(
                        "+{} coins, day {} streak!",
                        earned.amount, streak.current_streak
                    ));
                }
                Err(CoinError::Rejected(reason)) => {
                    log_rejection("daily_login", user_id, action, reason);
                    outcome.message = Some(format!("Day {} streak!", streak.current_streak));
                }
                Err(e) => return Err(e),
            }
            Ok(outcome)
        })
    }

    /// When `action` can next be earned within the current reward-day.
    pub fn action_timer(&self, user_id: &str, action: &str) -> CoinResult<ActionTimer> {
        let period = self.clock.period_at(self.time.now());
        let last_claim = self
            .store
            .read("earn.timer", |db| db.last_action_at(user_id, action))?;
        Ok(ActionTimer {
            can_claim:    !last_claim.is_some_and(|at| period.contains(at)),
            period_start: period.period_start,
            period_end:   period.period_end,
            next_reset:   period.next_reset(),
            last_claim,
        })
    }

    /// Run the anti-abuse guard for one attempt. A suspicious verdict is
    /// persisted for review before it is returned as a rejection.
    pub(crate) fn screen(&self, user_id: &str, action: &str, now: DateTime<Utc>) -> CoinResult<()> {
        match self.guard.check(user_id, action, now) {
            GuardVerdict::Allowed => Ok(()),
            GuardVerdict::RateLimited { .. } => Err(Rejection::RateLimited.into()),
            GuardVerdict::Suspicious { attempts, window_secs, locked_until } => {
                let flag = SuspiciousFlag {
                    id: None,
                    user_id: user_id.to_string(),
                    action: action.to_string(),
                    attempts,
                    window_secs,
                    flagged_at: now,
                    locked_until,
                };
                self.store.write("guard.flag", |db| {
                    db.insert_suspicious_flag(&flag)?;
                    let event = CoinEvent::SuspiciousActivity {
                        user_id: flag.user_id.clone(),
                        action: flag.action.clone(),
                        attempts,
                        window_secs,
                    };
                    db.append_event(&EventLogEntry::from_event(&event, now)?)
                })?;
                Err(Rejection::Suspicious.into())
            }
        }
    }

    /// Caps, cooldown, multiplier and credit for one earn, inside an
    /// existing write unit. Rejections leave the unit untouched.
    pub(crate) fn credit_action_in(
        db: &Db<'_>,
        clock: &RewardClock,
        rule: &CoinRule,
        req: &EarnRequest,
        multiplier: f64,
        now: DateTime<Utc>,
    ) -> CoinResult<EarnOutcome> {
        let user_id = req.user_id.as_str();
        let action = rule.action.as_str();

        let period = clock.period_at(now);
        let today = db.count_actions_between(user_id, action, period.period_start, period.period_end)?;
        if rule.max_per_day.is_some_and(|max| today >= max) {
            return Err(Rejection::CapReached.into());
        }
        let (month_start, month_end) = clock.month_bounds(now);
        let this_month = db.count_actions_between(user_id, action, month_start, month_end)?;
        if rule.max_per_month.is_some_and(|max| this_month >= max) {
            return Err(Rejection::CapReached.into());
        }

        if rule.cooldown_minutes > 0 {
            if let Some(last) = db.last_action_at(user_id, action)? {
                if now - last < Duration::minutes(rule.cooldown_minutes as i64) {
                    return Err(Rejection::Cooldown.into());
                }
            }
        }

        let base = req.amount.unwrap_or(rule.amount);
        let amount = (base as f64 * multiplier).round() as Coins;
        let mut posting = Posting::new(user_id, amount, action);
        if let Some(description) = req.description.as_deref() {
            posting = posting.description(description);
        }
        if let Some(metadata) = req.metadata.as_ref() {
            posting = posting.metadata(metadata);
        }
        let tx = Ledger::credit_in(db, posting, now)?;
        db.insert_action_occurrence(user_id, action, &tx.transaction_id, now)?;

        let event = CoinEvent::CoinsEarned {
            user_id: user_id.to_string(),
            action: action.to_string(),
            amount,
            multiplier,
            transaction_id: tx.transaction_id.clone(),
        };
        db.append_event(&EventLogEntry::from_event(&event, now)?)?;

        Ok(EarnOutcome {
            success:              true,
            amount,
            multiplier,
            transaction_id:       Some(tx.transaction_id),
            balance:              Some(tx.balance),
            remaining_today:      rule.max_per_day.map(|max| max.saturating_sub(today + 1)),
            remaining_this_month: rule.max_per_month.map(|max| max.saturating_sub(this_month + 1)),
            reason:               None,
            message:              Some(format!("+{amount} coins")),
        })
    }
}

pub(crate) fn log_rejection(operation: &str, user_id: &str, action: &str, reason: Rejection) {
    if reason.is_expected() {
        log::debug!("{operation}: {user_id}/{action} → {}", reason.code());
    } else {
        log::info!("{operation}: {user_id}/{action} rejected: {}", reason.code());
    }
}
