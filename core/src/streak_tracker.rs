//! Streak tracker: consecutive reward-day check-ins and the earning
//! multiplier they unlock.
//!
//! Transition on a check-in for reward-day D:
//!   last == D - 1  → current + 1
//!   last == D      → no-op
//!   otherwise      → 1
//!
//! RULE: Only the check-in path mutates streak state. Browsing and earning
//! read the multiplier but never move the streak.

use crate::{
    cache::TtlCache,
    clock::TimeSource,
    config::StreakConfig,
    error::{CoinError, CoinResult},
    event::{CoinEvent, EventLogEntry},
    store::{CoinStore, Db},
    types::UserId,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const STREAK_CONFIG_KEY: &str = "streak_config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStreak {
    pub user_id:           UserId,
    pub current_streak:    u32,
    pub longest_streak:    u32,
    pub last_login_date:   Option<NaiveDate>,
    pub streak_multiplier: f64,
}

impl UserStreak {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id:           user_id.to_string(),
            current_streak:    0,
            longest_streak:    0,
            last_login_date:   None,
            streak_multiplier: 1.0,
        }
    }

    /// A streak is alive while the user checked in today or yesterday.
    pub fn is_alive(&self, today: NaiveDate) -> bool {
        match self.last_login_date {
            Some(last) => last == today || last == today - Duration::days(1),
            None => false,
        }
    }

    /// Multiplier applied to earnings made on `today`.
    pub fn effective_multiplier(&self, today: NaiveDate, config: &StreakConfig) -> f64 {
        if self.is_alive(today) {
            self.streak_multiplier.clamp(1.0, config.max_multiplier)
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInOutcome {
    /// First check-in ever, or the first after a gap.
    Started,
    Extended,
    AlreadyCheckedIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub outcome: CheckInOutcome,
    pub streak:  UserStreak,
}

/// `min(1 + (streak - 1) * increment, max)`; 1.0 for no streak.
pub fn multiplier_for(streak: u32, config: &StreakConfig) -> f64 {
    if streak == 0 {
        return 1.0;
    }
    (1.0 + (streak - 1) as f64 * config.multiplier_increment).min(config.max_multiplier)
}

/// Preview of the multiplier the next check-in would unlock.
pub fn calculate_next_multiplier(current_streak: u32, config: &StreakConfig) -> f64 {
    (1.0 + current_streak as f64 * config.multiplier_increment).min(config.max_multiplier)
}

/// Apply a check-in for reward-day `today`. Pure.
pub fn apply_check_in(streak: &UserStreak, today: NaiveDate, config: &StreakConfig) -> CheckIn {
    let mut next = streak.clone();
    let outcome = match streak.last_login_date {
        Some(last) if last == today => {
            return CheckIn {
                outcome: CheckInOutcome::AlreadyCheckedIn,
                streak:  next,
            };
        }
        Some(last) if last == today - Duration::days(1) => {
            next.current_streak = streak.current_streak.saturating_add(1);
            CheckInOutcome::Extended
        }
        _ => {
            next.current_streak = 1;
            CheckInOutcome::Started
        }
    };
    next.last_login_date = Some(today);
    next.longest_streak = next.longest_streak.max(next.current_streak);
    next.streak_multiplier = multiplier_for(next.current_streak, config);
    CheckIn { outcome, streak: next }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginStreakStatus {
    pub current_streak:    u32,
    pub longest_streak:    u32,
    pub last_login_date:   Option<NaiveDate>,
    pub checked_in_today:  bool,
    pub multiplier:        f64,
    pub next_multiplier:   f64,
}

pub struct StreakTracker {
    store:    Arc<CoinStore>,
    time:     Arc<dyn TimeSource>,
    defaults: StreakConfig,
    cache:    TtlCache<&'static str, StreakConfig>,
}

impl StreakTracker {
    pub fn new(
        store: Arc<CoinStore>,
        time: Arc<dyn TimeSource>,
        defaults: StreakConfig,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            time,
            defaults,
            cache: TtlCache::new(ttl),
        }
    }

    /// The stored streak config, or the configured defaults when no admin
    /// has written one.
    pub fn config(&self) -> CoinResult<StreakConfig> {
        self.cache.get_or_try_insert_with(&STREAK_CONFIG_KEY, || {
            let stored: Option<StreakConfig> = self
                .store
                .read("streak.config", |db| db.setting(STREAK_CONFIG_KEY))?;
            match stored {
                Some(config) => match config.validate() {
                    Ok(()) => Ok(config),
                    Err(reason) => {
                        log::warn!("streak: stored config invalid ({reason}), using defaults");
                        Ok(self.defaults)
                    }
                },
                None => Ok(self.defaults),
            }
        })
    }

    pub fn set_config(&self, config: StreakConfig) -> CoinResult<()> {
        config.validate().map_err(|reason| CoinError::InvalidSetting {
            key: STREAK_CONFIG_KEY.to_string(),
            reason,
        })?;
        let now = self.time.now();
        self.store.write("streak.set_config", |db| {
            db.put_setting(STREAK_CONFIG_KEY, &config, now)?;
            let event = CoinEvent::StreakConfigUpdated {
                max_multiplier:       config.max_multiplier,
                multiplier_increment: config.multiplier_increment,
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)
        })?;
        self.cache.invalidate(&STREAK_CONFIG_KEY);
        Ok(())
    }

    pub fn status(&self, user_id: &str, today: NaiveDate) -> CoinResult<LoginStreakStatus> {
        let config = self.config()?;
        let streak = self
            .store
            .read("streak.status", |db| db.streak(user_id))?
            .unwrap_or_else(|| UserStreak::new(user_id));
        let alive = streak.is_alive(today);
        let current = if alive { streak.current_streak } else { 0 };
        Ok(LoginStreakStatus {
            current_streak:   current,
            longest_streak:   streak.longest_streak,
            last_login_date:  streak.last_login_date,
            checked_in_today: streak.last_login_date == Some(today),
            multiplier:       streak.effective_multiplier(today, &config),
            next_multiplier:  calculate_next_multiplier(current, &config),
        })
    }

    /// Check in inside an existing write unit. Saves only on a transition.
    pub(crate) fn check_in_in(
        db: &Db<'_>,
        user_id: &str,
        today: NaiveDate,
        config: &StreakConfig,
        now: chrono::DateTime<chrono::Utc>,
    ) -> CoinResult<CheckIn> {
        let current = db.streak(user_id)?.unwrap_or_else(|| UserStreak::new(user_id));
        let check_in = apply_check_in(&current, today, config);
        if check_in.outcome != CheckInOutcome::AlreadyCheckedIn {
            db.save_streak(&check_in.streak, now)?;
            let event = CoinEvent::StreakCheckedIn {
                user_id:        user_id.to_string(),
                reward_date:    today,
                current_streak: check_in.streak.current_streak,
                multiplier:     check_in.streak.streak_multiplier,
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)?;
        }
        Ok(check_in)
    }

    pub(crate) fn multiplier_in(
        db: &Db<'_>,
        user_id: &str,
        today: NaiveDate,
        config: &StreakConfig,
    ) -> CoinResult<f64> {
        Ok(db
            .streak(user_id)?
            .map_or(1.0, |s| s.effective_multiplier(today, config)))
    }
}
