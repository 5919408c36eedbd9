//! Integration tests for daily claim codes.
//!
//! 1. The current code is issued lazily and stays fixed for its reward-day
//! 2. A code is claimed at most once per user
//! 3. Unknown and expired codes are refused
//! 4. Consecutive reward-days chain and raise the multiplier
//! 5. Chain status follows code expiry

use chrono::{DateTime, Duration, TimeZone, Utc};
use coin_core::{
    clock::ManualTimeSource,
    engine::CoinEngine,
    error::Rejection,
    event::CoinEvent,
    rule_registry::CoinRule,
};
use std::sync::Arc;

fn sp(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap() + Duration::hours(3)
}

fn build() -> (CoinEngine, Arc<ManualTimeSource>) {
    let time = Arc::new(ManualTimeSource::new(sp(2026, 10, 5, 9, 0, 0)));
    let engine = CoinEngine::build_test_at(time.clone()).expect("build_test_at failed");
    engine
        .upsert_rule(&CoinRule::new("daily_code", 10).max_per_day(2))
        .unwrap();
    (engine, time)
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: lazy issuance
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn current_code_is_issued_once_per_reward_day() {
    let (engine, time) = build();

    let first = engine.get_current_code().unwrap();
    assert_eq!(first.code.len(), 8);
    assert!(first.can_claim);
    assert!(first.is_valid);
    assert_eq!(first.created_at, sp(2026, 10, 5, 9, 0, 0));
    assert_eq!(first.claimable_until - first.created_at, Duration::hours(4));
    assert_eq!(first.valid_until - first.created_at, Duration::hours(48));

    time.advance(Duration::hours(5));
    let later = engine.get_current_code().unwrap();
    assert_eq!(later.code, first.code);
    assert!(!later.can_claim);
    assert!(later.is_valid);

    let issued = engine
        .recent_events(10)
        .unwrap()
        .iter()
        .filter(|e| e.event_type == "daily_code_issued")
        .count();
    assert_eq!(issued, 1);

    // 20:00 opens a new reward-day with a new code.
    time.set(sp(2026, 10, 5, 20, 0, 0));
    let next = engine.get_current_code().unwrap();
    assert_ne!(next.code, first.code);
    assert_eq!(next.reward_date, first.reward_date + Duration::days(1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: single claim
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn a_code_is_claimed_once_per_user() {
    let (engine, _) = build();
    let code = engine.get_current_code().unwrap().code;

    let first = engine.claim_code("ana", &code).unwrap();
    assert!(first.success);
    assert_eq!(first.streak_position, Some(1));
    assert_eq!(first.coins_earned, Some(10));

    let again = engine.claim_code("ana", &code).unwrap();
    assert!(!again.success);
    assert_eq!(again.reason, Some(Rejection::AlreadyClaimed));

    assert_eq!(engine.get_balance("ana").unwrap().balance, 10);
    assert_eq!(engine.get_streak_status("ana").unwrap().valid_codes_count, 1);

    // Another user may still claim it.
    assert!(engine.claim_code("bia", &code).unwrap().success);
}

#[test]
fn typed_codes_are_normalized() {
    let (engine, _) = build();
    let code = engine.get_current_code().unwrap().code;
    let typed = format!("  {}\n", code.to_lowercase());

    let outcome = engine.claim_code("caio", &typed).unwrap();
    assert!(outcome.success);
    let events: Vec<CoinEvent> = engine
        .events_for_user("caio")
        .unwrap()
        .iter()
        .map(|e| e.decode().unwrap())
        .collect();
    assert!(events.contains(&CoinEvent::CodeClaimed {
        user_id:         "caio".into(),
        code:            code.clone(),
        streak_position: 1,
    }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: refused codes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unknown_and_expired_codes_are_refused() {
    let (engine, time) = build();
    let unknown = engine.claim_code("dani", "NOPE2345").unwrap();
    assert_eq!(unknown.reason, Some(Rejection::CodeNotFound));

    let code = engine.get_current_code().unwrap().code;
    // Past the claim window but inside validity still counts.
    time.advance(Duration::hours(30));
    assert!(engine.claim_code("dani", &code).unwrap().success);

    time.advance(Duration::hours(18));
    let expired = engine.claim_code("eli", &code).unwrap();
    assert_eq!(expired.reason, Some(Rejection::CodeExpired));
    assert_eq!(engine.get_balance("eli").unwrap().balance, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: chains
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn consecutive_codes_chain_and_raise_the_multiplier() {
    let (engine, time) = build();

    let day1 = engine.claim_daily_bonus("fred").unwrap();
    assert_eq!(day1.streak_position, Some(1));
    assert_eq!(day1.multiplier, Some(1.0));
    assert_eq!(day1.coins_earned, Some(10));

    time.advance(Duration::days(1));
    let day2 = engine.claim_daily_bonus("fred").unwrap();
    assert_eq!(day2.streak_position, Some(2));
    assert_eq!(day2.coins_earned, Some(11));

    let status = engine.get_streak_status("fred").unwrap();
    assert!(status.has_active_streak);
    assert_eq!(status.streak_count, 2);
    assert_eq!(status.valid_codes_count, 2);

    // Skipping a reward-day restarts the chain.
    time.advance(Duration::days(2));
    let restarted = engine.claim_daily_bonus("fred").unwrap();
    assert_eq!(restarted.streak_position, Some(1));
    assert_eq!(engine.get_balance("fred").unwrap().balance, 31);
}

#[test]
fn a_late_claim_of_yesterdays_code_still_chains() {
    let (engine, time) = build();
    let yesterday = engine.get_current_code().unwrap().code;
    time.advance(Duration::days(1));
    let today = engine.get_current_code().unwrap().code;

    assert_eq!(engine.claim_code("gabi", &yesterday).unwrap().streak_position, Some(1));
    assert_eq!(engine.claim_code("gabi", &today).unwrap().streak_position, Some(2));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: status
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn chain_status_expires_with_the_codes() {
    let (engine, time) = build();
    let empty = engine.get_streak_status("hugo").unwrap();
    assert!(!empty.has_active_streak);
    assert_eq!(empty.streak_count, 0);

    engine.claim_daily_bonus("hugo").unwrap();
    time.advance(Duration::days(3));

    let lapsed = engine.get_streak_status("hugo").unwrap();
    assert!(!lapsed.has_active_streak);
    assert_eq!(lapsed.valid_codes_count, 0);
    assert!(lapsed.codes.is_empty());
}
