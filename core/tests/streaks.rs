//! Integration tests for login streaks through the engine.
//!
//! 1. Consecutive check-ins raise the multiplier and the daily reward
//! 2. A second check-in in the same reward-day changes nothing
//! 3. A gap of two reward-days resets to 1, keeping the longest streak
//! 4. The multiplier never exceeds the configured maximum
//! 5. Streak status previews the next multiplier

use chrono::{DateTime, Duration, TimeZone, Utc};
use coin_core::{
    clock::ManualTimeSource,
    config::StreakConfig,
    engine::CoinEngine,
    error::{CoinError, Rejection},
    rule_registry::CoinRule,
};
use std::sync::Arc;

fn sp(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap() + Duration::hours(3)
}

fn build() -> (CoinEngine, Arc<ManualTimeSource>) {
    let time = Arc::new(ManualTimeSource::new(sp(2026, 8, 3, 9, 0, 0)));
    let engine = CoinEngine::build_test_at(time.clone()).expect("build_test_at failed");
    engine
        .upsert_rule(&CoinRule::new("daily_login", 10).max_per_day(1))
        .unwrap();
    (engine, time)
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: consecutive days
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn consecutive_logins_grow_streak_and_reward() {
    let (engine, time) = build();

    let day1 = engine.process_daily_login("ana").unwrap();
    assert!(day1.success);
    assert_eq!(day1.streak, 1);
    assert_eq!(day1.multiplier, 1.0);
    assert_eq!(day1.coins_earned, 10);

    time.advance(Duration::days(1));
    let day2 = engine.process_daily_login("ana").unwrap();
    assert_eq!(day2.streak, 2);
    assert!((day2.multiplier - 1.1).abs() < 1e-9);
    assert_eq!(day2.coins_earned, 11);

    let account = engine.get_balance("ana").unwrap();
    assert_eq!(account.balance, 21);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: idempotent within a reward-day
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn second_login_same_day_is_a_no_op() {
    let (engine, time) = build();
    engine.process_daily_login("bia").unwrap();

    // Still before the 20:00 cutoff.
    time.advance(Duration::hours(10));
    let again = engine.process_daily_login("bia").unwrap();
    assert!(!again.success);
    assert_eq!(again.reason, Some(Rejection::CapReached));
    assert_eq!(again.coins_earned, 0);
    assert_eq!(again.streak, 1);

    assert_eq!(engine.get_balance("bia").unwrap().balance, 10);
    assert_eq!(engine.transaction_history("bia", 10).unwrap().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: gap resets
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn gap_resets_streak_and_multiplier() {
    let (engine, time) = build();
    for _ in 0..4 {
        engine.process_daily_login("caio").unwrap();
        time.advance(Duration::days(1));
    }
    // One reward-day skipped.
    time.advance(Duration::days(1));

    let after_gap = engine.process_daily_login("caio").unwrap();
    assert_eq!(after_gap.streak, 1);
    assert_eq!(after_gap.longest_streak, 4);
    assert_eq!(after_gap.multiplier, 1.0);
    assert_eq!(after_gap.coins_earned, 10);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: capped multiplier
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn multiplier_is_monotonic_and_capped() {
    let (engine, time) = build();
    engine
        .set_streak_config(StreakConfig { max_multiplier: 1.3, multiplier_increment: 0.1 })
        .unwrap();

    let mut previous = 0.0;
    for _ in 0..10 {
        let login = engine.process_daily_login("dani").unwrap();
        assert!(login.multiplier >= previous);
        assert!(login.multiplier <= 1.3);
        previous = login.multiplier;
        time.advance(Duration::days(1));
    }
    assert_eq!(previous, 1.3);
}

#[test]
fn invalid_streak_config_is_refused() {
    let (engine, _) = build();
    let err = engine
        .set_streak_config(StreakConfig { max_multiplier: 0.5, multiplier_increment: 0.1 })
        .unwrap_err();
    assert!(matches!(err, CoinError::InvalidSetting { .. }));
    assert_eq!(engine.streak_config().unwrap(), engine.config().streak);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: status preview
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn login_streak_previews_next_multiplier() {
    let (engine, time) = build();

    let fresh = engine.get_login_streak("eli").unwrap();
    assert_eq!(fresh.current_streak, 0);
    assert_eq!(fresh.next_multiplier, 1.0);

    engine.process_daily_login("eli").unwrap();
    time.advance(Duration::days(1));
    engine.process_daily_login("eli").unwrap();

    let status = engine.get_login_streak("eli").unwrap();
    assert_eq!(status.current_streak, 2);
    assert!(status.checked_in_today);
    assert!((status.multiplier - 1.1).abs() < 1e-9);
    assert!((status.next_multiplier - 1.2).abs() < 1e-9);

    // Browsing never moves the streak.
    time.advance(Duration::days(3));
    let stale = engine.get_login_streak("eli").unwrap();
    assert_eq!(stale.current_streak, 0);
    assert_eq!(stale.longest_streak, 2);
    assert_eq!(stale.multiplier, 1.0);
}
