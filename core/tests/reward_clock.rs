//! Integration tests for the reward clock as callers see it.
//!
//! 1. 19:59:59 and 20:00:01 São Paulo on one calendar date are different
//!    reward-days, each with a fresh canClaim
//! 2. Periods are absolute UTC instants, independent of the caller
//! 3. The daily timer follows the claim state

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use coin_core::{
    clock::{ManualTimeSource, RewardClock},
    engine::CoinEngine,
    rule_registry::CoinRule,
};
use std::sync::Arc;

fn sp(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap() + Duration::hours(3)
}

fn build_at(at: DateTime<Utc>) -> (CoinEngine, Arc<ManualTimeSource>) {
    let time = Arc::new(ManualTimeSource::new(at));
    let engine = CoinEngine::build_test_at(time.clone()).expect("build_test_at failed");
    engine
        .upsert_rule(&CoinRule::new("daily_login", 10).max_per_day(1))
        .unwrap();
    (engine, time)
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: the cutoff splits one calendar date into two reward-days
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn one_second_each_side_of_the_cutoff_are_different_days() {
    let (engine, time) = build_at(sp(2026, 5, 4, 19, 59, 59));

    let before = engine.get_daily_timer("ana").unwrap();
    assert!(before.can_claim);
    let login = engine.process_daily_login("ana").unwrap();
    assert!(login.success);
    assert_eq!(login.coins_earned, 10);
    assert!(!engine.get_daily_timer("ana").unwrap().can_claim);

    time.set(sp(2026, 5, 4, 20, 0, 1));
    let after = engine.get_daily_timer("ana").unwrap();
    assert!(after.can_claim);
    assert_eq!(after.period_start, before.period_end);
    assert_eq!(after.last_claim, Some(sp(2026, 5, 4, 19, 59, 59)));

    let second = engine.process_daily_login("ana").unwrap();
    assert!(second.success);
    assert_eq!(second.streak, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: absolute instants
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn periods_are_reported_in_utc() {
    let (engine, _) = build_at(sp(2026, 5, 4, 9, 30, 0));
    let period = engine.reward_period().unwrap();

    assert_eq!(period.reward_date, NaiveDate::from_ymd_opt(2026, 5, 4).unwrap());
    assert_eq!(period.period_start, Utc.with_ymd_and_hms(2026, 5, 3, 23, 0, 0).unwrap());
    assert_eq!(period.period_end, Utc.with_ymd_and_hms(2026, 5, 4, 23, 0, 0).unwrap());
    assert_eq!(period.next_reset(), period.period_end);
    assert_eq!(period.period_end - period.period_start, Duration::hours(24));
}

#[test]
fn clock_is_independent_of_machine_zone() {
    let clock = RewardClock::new(chrono_tz::America::Sao_Paulo, 20).unwrap();
    // 23:30 UTC is 20:30 in São Paulo but 08:30 next day in Tokyo.
    let now = Utc.with_ymd_and_hms(2026, 7, 1, 23, 30, 0).unwrap();
    assert_eq!(clock.reward_date(now), NaiveDate::from_ymd_opt(2026, 7, 2).unwrap());
    assert!(clock.period_at(now).contains(now));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: timers for other actions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn action_timer_tracks_any_once_per_day_action() {
    let (engine, time) = build_at(sp(2026, 5, 4, 10, 0, 0));
    engine.upsert_rule(&CoinRule::new("quiz", 15).max_per_day(1)).unwrap();

    assert!(engine.get_action_timer("bia", "quiz").unwrap().can_claim);
    engine
        .earn_coins(&coin_core::earning::EarnRequest::new("bia", "quiz"))
        .unwrap();
    let timer = engine.get_action_timer("bia", "quiz").unwrap();
    assert!(!timer.can_claim);
    assert_eq!(timer.last_claim, Some(sp(2026, 5, 4, 10, 0, 0)));
    assert_eq!(timer.next_reset, sp(2026, 5, 4, 20, 0, 0));

    time.set(timer.next_reset);
    assert!(engine.get_action_timer("bia", "quiz").unwrap().can_claim);
}
