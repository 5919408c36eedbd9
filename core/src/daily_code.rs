//! Daily code engine: one claim code per reward-day.
//!
//! A code is issued lazily by the first request in its reward-day and is
//! immutable afterwards. It carries two windows measured from issuance:
//!   claimable_until  the short window in which it is advertised
//!   valid_until      the grace window in which a claim still counts
//!
//! Claimed codes chain: a claim whose previous reward-day's code is held
//! and unexpired extends the chain, anything else restarts it at 1. The
//! chain position drives the reward multiplier.

use crate::{
    clock::{RewardClock, TimeSource},
    config::CodeConfig,
    earning::{log_rejection, EarnRequest, EarningOrchestrator},
    error::{CoinError, CoinResult, Rejection},
    event::{CoinEvent, EventLogEntry},
    rng::{normalize_code, CodeRng},
    rule_registry::RuleRegistry,
    store::{CoinStore, Db},
    streak_tracker::multiplier_for,
    system_toggle::SystemToggle,
    types::{CancelToken, Coins, UserId},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Attempts at drawing a code that does not collide with an older one.
const MAX_DRAWS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCode {
    pub code:            String,
    pub reward_date:     NaiveDate,
    pub created_at:      DateTime<Utc>,
    pub claimable_until: DateTime<Utc>,
    pub valid_until:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCode {
    pub user_id:         UserId,
    pub code:            String,
    pub reward_date:     NaiveDate,
    pub added_at:        DateTime<Utc>,
    pub expires_at:      DateTime<Utc>,
    pub streak_position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentCode {
    pub code:            String,
    pub reward_date:     NaiveDate,
    pub created_at:      DateTime<Utc>,
    pub claimable_until: DateTime<Utc>,
    pub valid_until:     DateTime<Utc>,
    pub can_claim:       bool,
    pub is_valid:        bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub success:         bool,
    pub message:         String,
    pub streak_position: Option<u32>,
    pub coins_earned:    Option<Coins>,
    pub multiplier:      Option<f64>,
    pub reason:          Option<Rejection>,
}

impl ClaimOutcome {
    fn rejected(reason: Rejection) -> Self {
        Self {
            success:         false,
            message:         reason.user_message().to_string(),
            streak_position: None,
            coins_earned:    None,
            multiplier:      None,
            reason:          Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStreakStatus {
    pub has_active_streak: bool,
    pub streak_count:      u32,
    pub valid_codes_count: u32,
    pub codes:             Vec<UserCode>,
}

pub struct DailyCodeEngine {
    store:        Arc<CoinStore>,
    time:         Arc<dyn TimeSource>,
    clock:        RewardClock,
    toggle:       Arc<SystemToggle>,
    rules:        Arc<RuleRegistry>,
    orchestrator: Arc<EarningOrchestrator>,
    config:       CodeConfig,
    rng:          CodeRng,
}

impl DailyCodeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CoinStore>,
        time: Arc<dyn TimeSource>,
        clock: RewardClock,
        toggle: Arc<SystemToggle>,
        rules: Arc<RuleRegistry>,
        orchestrator: Arc<EarningOrchestrator>,
        config: CodeConfig,
        rng: CodeRng,
    ) -> Self {
        Self {
            store,
            time,
            clock,
            toggle,
            rules,
            orchestrator,
            config,
            rng,
        }
    }

    /// The code for the current reward-day, issuing it on first request.
    pub fn current_code(&self) -> CoinResult<CurrentCode> {
        self.toggle.ensure_enabled()?;
        let now = self.time.now();
        let today = self.clock.reward_date(now);

        let existing = self
            .store
            .read("codes.current", |db| db.daily_code_for_date(today))?;
        let code = match existing {
            Some(code) => code,
            None => self.store.write("codes.issue", |db| self.issue_in(db, today, now))?,
        };
        Ok(CurrentCode {
            can_claim: now < code.claimable_until,
            is_valid:  now < code.valid_until,
            code:            code.code,
            reward_date:     code.reward_date,
            created_at:      code.created_at,
            claimable_until: code.claimable_until,
            valid_until:     code.valid_until,
        })
    }

    fn issue_in(&self, db: &Db<'_>, today: NaiveDate, now: DateTime<Utc>) -> CoinResult<DailyCode> {
        if let Some(code) = db.daily_code_for_date(today)? {
            return Ok(code);
        }
        let mut drawn = None;
        for _ in 0..MAX_DRAWS {
            let candidate = self.rng.next_code(self.config.code_length);
            if db.daily_code(&candidate)?.is_none() {
                drawn = Some(candidate);
                break;
            }
        }
        let code = drawn.ok_or_else(|| {
            anyhow::anyhow!("no unused code after {MAX_DRAWS} draws of length {}", self.config.code_length)
        })?;

        let daily = DailyCode {
            code,
            reward_date:     today,
            created_at:      now,
            claimable_until: now + Duration::hours(self.config.claim_window_hours),
            valid_until:     now + Duration::hours(self.config.validity_hours),
        };
        db.insert_daily_code(&daily)?;
        let event = CoinEvent::DailyCodeIssued {
            code:        daily.code.clone(),
            reward_date: today,
        };
        db.append_event(&EventLogEntry::from_event(&event, now)?)?;
        log::info!("codes: issued {} for reward-day {today}", daily.code);
        Ok(daily)
    }

    pub fn claim(&self, user_id: &str, raw_code: &str, cancel: &CancelToken) -> CoinResult<ClaimOutcome> {
        let action = self.config.reward_action.as_str();
        match self.try_claim(user_id, raw_code, cancel) {
            Err(CoinError::Rejected(reason)) => {
                log_rejection("claim", user_id, action, reason);
                Ok(ClaimOutcome::rejected(reason))
            }
            other => other,
        }
    }

    fn try_claim(&self, user_id: &str, raw_code: &str, cancel: &CancelToken) -> CoinResult<ClaimOutcome> {
        self.toggle.ensure_enabled()?;
        let now = self.time.now();
        let action = self.config.reward_action.as_str();
        self.orchestrator.screen(user_id, action, now)?;

        let code = normalize_code(raw_code);
        let rule = self.rules.resolve(action)?;
        let streak_config = self.orchestrator.streak_config()?;
        let validity = Duration::hours(self.config.validity_hours);
        let clock = self.clock;

        let outcome = self.store.write_cancellable("codes.claim", cancel, |db| {
            let daily = db.daily_code(&code)?.ok_or(Rejection::CodeNotFound)?;
            if now >= daily.valid_until {
                return Err(Rejection::CodeExpired.into());
            }
            if db.user_code(user_id, &code)?.is_some() {
                return Err(Rejection::AlreadyClaimed.into());
            }

            let previous = db.user_code_for_date(user_id, daily.reward_date - Duration::days(1))?;
            let streak_position = match previous {
                Some(prev) if prev.expires_at > now => prev.streak_position + 1,
                _ => 1,
            };
            db.insert_user_code(&UserCode {
                user_id: user_id.to_string(),
                code: code.clone(),
                reward_date: daily.reward_date,
                added_at: now,
                expires_at: now + validity,
                streak_position,
            })?;
            let event = CoinEvent::CodeClaimed {
                user_id: user_id.to_string(),
                code: code.clone(),
                streak_position,
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)?;

            let multiplier = multiplier_for(streak_position, &streak_config);
            let mut coins_earned = 0;
            if let Some(rule) = rule {
                let req = EarnRequest::new(user_id, action)
                    .description(&format!("Daily code {code}"))
                    .metadata(serde_json::json!({
                        "code": code,
                        "streak_position": streak_position,
                    }));
                match EarningOrchestrator::credit_action_in(db, &clock, &rule, &req, multiplier, now) {
                    Ok(earned) => coins_earned = earned.amount,
                    Err(CoinError::Rejected(reason)) => log_rejection("claim", user_id, action, reason),
                    Err(e) => return Err(e),
                }
            }

            Ok(ClaimOutcome {
                success:         true,
                message:         format!("Code accepted! Streak position {streak_position}."),
                streak_position: Some(streak_position),
                coins_earned:    Some(coins_earned),
                multiplier:      Some(multiplier),
                reason:          None,
            })
        })?;

        log::info!(
            "codes: {user_id} claimed {code} at position {:?} for {:?} coins",
            outcome.streak_position, outcome.coins_earned
        );
        Ok(outcome)
    }

    /// Claim the current reward-day's code for `user_id` in one step.
    pub fn claim_daily_bonus(&self, user_id: &str, cancel: &CancelToken) -> CoinResult<ClaimOutcome> {
        let current = match self.current_code() {
            Err(CoinError::Rejected(reason)) => return Ok(ClaimOutcome::rejected(reason)),
            other => other?,
        };
        self.claim(user_id, &current.code, cancel)
    }

    pub fn streak_status(&self, user_id: &str) -> CoinResult<CodeStreakStatus> {
        let now = self.time.now();
        let today = self.clock.reward_date(now);
        let codes = self
            .store
            .read("codes.status", |db| db.user_codes_valid_at(user_id, now))?;

        // The chain is alive while its newest link is today's or yesterday's code.
        let streak_count = codes
            .iter()
            .max_by_key(|c| c.reward_date)
            .filter(|c| c.reward_date >= today - Duration::days(1))
            .map_or(0, |c| c.streak_position);

        Ok(CodeStreakStatus {
            has_active_streak: streak_count > 0,
            streak_count,
            valid_codes_count: codes.len() as u32,
            codes,
        })
    }
}
