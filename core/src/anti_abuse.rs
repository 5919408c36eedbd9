//! Anti-abuse guard: authoritative per-(user, action) attempt limits.
//!
//! Each key carries its own state behind its own mutex, so attempts for
//! different users never contend. Checks run in this order:
//!   1. active lockout               → RateLimited
//!   2. burst ceiling exceeded       → Suspicious (starts a lockout)
//!   3. session cap reached          → RateLimited
//!   4. cooldown since last attempt  → RateLimited
//!
//! Every attempt outside a lockout counts toward the burst window and the
//! session cap, and restarts the cooldown, accepted or not. Idle keys are
//! swept every `sweep_every` checks.

use crate::{
    config::{GuardConfig, GuardPolicy},
    types::UserId,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardVerdict {
    Allowed,
    RateLimited {
        retry_after_ms: i64,
    },
    Suspicious {
        attempts:     u32,
        window_secs:  u64,
        locked_until: DateTime<Utc>,
    },
}

impl GuardVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Default)]
struct AttemptState {
    last_attempt_at:       Option<DateTime<Utc>>,
    session_started_at:    Option<DateTime<Utc>>,
    attempts_this_session: u32,
    recent_attempts:       VecDeque<DateTime<Utc>>,
    locked_until:          Option<DateTime<Utc>>,
}

impl AttemptState {
    fn evaluate(&mut self, policy: &GuardPolicy, now: DateTime<Utc>) -> GuardVerdict {
        if let Some(until) = self.locked_until {
            if now < until {
                return GuardVerdict::RateLimited {
                    retry_after_ms: (until - now).num_milliseconds(),
                };
            }
            self.locked_until = None;
        }

        let burst_window = Duration::seconds(policy.burst_window_secs as i64);
        while matches!(self.recent_attempts.front(), Some(at) if *at <= now - burst_window) {
            self.recent_attempts.pop_front();
        }
        self.recent_attempts.push_back(now);
        let attempts = self.recent_attempts.len() as u32;
        if attempts > policy.burst_ceiling {
            // The lockout replaces the session: the key starts fresh once it ends.
            let locked_until = now + Duration::seconds(policy.lockout_secs as i64);
            self.locked_until = Some(locked_until);
            self.recent_attempts.clear();
            self.session_started_at = None;
            self.attempts_this_session = 0;
            self.last_attempt_at = Some(now);
            return GuardVerdict::Suspicious {
                attempts,
                window_secs: policy.burst_window_secs,
                locked_until,
            };
        }

        let session_window = Duration::seconds(policy.session_window_secs as i64);
        if let Some(started) = self.session_started_at {
            if now - started >= session_window {
                self.session_started_at = None;
                self.attempts_this_session = 0;
            }
        }
        let previous = self.last_attempt_at.replace(now);
        let session_started = *self.session_started_at.get_or_insert(now);
        let prior_in_session = self.attempts_this_session;
        self.attempts_this_session = prior_in_session.saturating_add(1);

        if prior_in_session >= policy.session_cap {
            return GuardVerdict::RateLimited {
                retry_after_ms: (session_started + session_window - now).num_milliseconds().max(0),
            };
        }

        if let Some(last) = previous {
            let cooldown = Duration::milliseconds(policy.cooldown_ms as i64);
            if now - last < cooldown {
                return GuardVerdict::RateLimited {
                    retry_after_ms: (last + cooldown - now).num_milliseconds(),
                };
            }
        }

        GuardVerdict::Allowed
    }

    fn last_seen(&self) -> Option<DateTime<Utc>> {
        [
            self.last_attempt_at,
            self.recent_attempts.back().copied(),
            self.locked_until,
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

pub struct AntiAbuseGuard {
    config:  GuardConfig,
    entries: DashMap<(UserId, String), Mutex<AttemptState>>,
    checks:  AtomicU64,
}

impl AntiAbuseGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            checks:  AtomicU64::new(0),
        }
    }

    pub fn policy_for(&self, action: &str) -> &GuardPolicy {
        self.config.policy_for(action)
    }

    /// Record an attempt and decide whether it may proceed.
    pub fn check(&self, user_id: &str, action: &str, now: DateTime<Utc>) -> GuardVerdict {
        let policy = self.config.policy_for(action);
        let verdict = self
            .entries
            .entry((user_id.to_string(), action.to_string()))
            .or_insert_with(|| Mutex::new(AttemptState::default()))
            .lock()
            .evaluate(policy, now);

        let every = self.config.sweep_every;
        if every > 0 && (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % every == 0 {
            let removed = self.sweep_idle(now);
            if removed > 0 {
                log::debug!("guard: swept {removed} idle keys");
            }
        }

        match verdict {
            GuardVerdict::Allowed => {}
            GuardVerdict::RateLimited { retry_after_ms } => {
                log::debug!("guard: {user_id}/{action} rate limited, retry in {retry_after_ms}ms");
            }
            GuardVerdict::Suspicious { attempts, window_secs, locked_until } => {
                log::warn!(
                    "guard: {user_id}/{action} made {attempts} attempts in {window_secs}s, locked until {locked_until}"
                );
            }
        }
        verdict
    }

    pub fn attempts_this_session(&self, user_id: &str, action: &str) -> u32 {
        self.entries
            .get(&(user_id.to_string(), action.to_string()))
            .map_or(0, |entry| entry.lock().attempts_this_session)
    }

    /// Forget all state for one key, lifting any lockout.
    pub fn reset(&self, user_id: &str, action: &str) {
        self.entries.remove(&(user_id.to_string(), action.to_string()));
    }

    /// Drop entries with no activity inside any of their windows.
    /// Returns how many were removed.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, action), state| {
            let policy = self.config.policy_for(action);
            let horizon = Duration::seconds(
                policy
                    .session_window_secs
                    .max(policy.burst_window_secs)
                    .max(policy.cooldown_ms / 1000 + 1) as i64,
            );
            state
                .lock()
                .last_seen()
                .is_some_and(|seen| now - seen < horizon)
        });
        before - self.entries.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use chrono::TimeZone;

    fn guard() -> AntiAbuseGuard {
        AntiAbuseGuard::new(EngineConfig::default_test().guard)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
    }

    #[test]
    fn cooldown_rejects_until_elapsed() {
        let g = guard();
        assert!(g.check("u", "scroll", t0()).is_allowed());
        let v = g.check("u", "scroll", t0() + Duration::seconds(30));
        assert_eq!(v, GuardVerdict::RateLimited { retry_after_ms: 90_000 });
        assert!(g.check("u", "scroll", t0() + Duration::seconds(150)).is_allowed());
    }

    #[test]
    fn rejected_attempts_restart_the_cooldown() {
        let g = guard();
        assert!(g.check("u", "scroll", t0()).is_allowed());
        g.check("u", "scroll", t0() + Duration::seconds(60));
        let v = g.check("u", "scroll", t0() + Duration::seconds(120));
        assert_eq!(v, GuardVerdict::RateLimited { retry_after_ms: 60_000 });
        assert_eq!(g.attempts_this_session("u", "scroll"), 3);
    }

    #[test]
    fn session_cap_holds_until_window_rolls() {
        let g = guard();
        for i in 0..3 {
            assert!(g.check("u", "scroll", t0() + Duration::minutes(3 * i)).is_allowed());
        }
        assert_eq!(g.attempts_this_session("u", "scroll"), 3);
        let capped = g.check("u", "scroll", t0() + Duration::minutes(20));
        assert!(matches!(capped, GuardVerdict::RateLimited { .. }));
        assert!(g.check("u", "scroll", t0() + Duration::minutes(61)).is_allowed());
        assert_eq!(g.attempts_this_session("u", "scroll"), 1);
    }

    #[test]
    fn burst_flags_and_locks_out() {
        let g = guard();
        let mut last = GuardVerdict::Allowed;
        for i in 0..6 {
            last = g.check("bot", "scroll", t0() + Duration::seconds(i));
        }
        let GuardVerdict::Suspicious { attempts, locked_until, .. } = last else {
            panic!("expected suspicious, got {last:?}");
        };
        assert_eq!(attempts, 6);
        assert_eq!(locked_until, t0() + Duration::seconds(5) + Duration::minutes(15));

        let during = g.check("bot", "scroll", t0() + Duration::minutes(10));
        assert!(matches!(during, GuardVerdict::RateLimited { .. }));
        assert!(g.check("bot", "scroll", t0() + Duration::minutes(30)).is_allowed());
    }

    #[test]
    fn users_and_actions_are_independent() {
        let g = guard();
        assert!(g.check("a", "scroll", t0()).is_allowed());
        assert!(g.check("b", "scroll", t0()).is_allowed());
        assert!(g.check("a", "purchase", t0()).is_allowed());
        assert_eq!(g.tracked_keys(), 3);
    }

    #[test]
    fn sweep_drops_idle_entries() {
        let g = guard();
        g.check("a", "scroll", t0());
        g.check("b", "scroll", t0() + Duration::minutes(50));
        assert_eq!(g.sweep_idle(t0() + Duration::minutes(70)), 1);
        assert_eq!(g.tracked_keys(), 1);
    }

    #[test]
    fn checks_sweep_idle_keys_periodically() {
        let mut config = EngineConfig::default_test().guard;
        config.sweep_every = 100;
        let g = AntiAbuseGuard::new(config);
        for i in 0..99 {
            g.check("u", &format!("junk-{i}"), t0());
        }
        assert_eq!(g.tracked_keys(), 99);

        g.check("u", "purchase", t0() + Duration::hours(2));
        assert_eq!(g.tracked_keys(), 1);
    }
}
