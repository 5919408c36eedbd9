//! Integration tests for the anti-abuse guard in front of earning.
//!
//! Uses the test config's `scroll` policy: 2 minute cooldown since the last
//! attempt, 3 attempts per hour, more than 5 attempts in 60s is suspicious, 15 minute
//! lockout.

use chrono::{DateTime, Duration, TimeZone, Utc};
use coin_core::{
    clock::ManualTimeSource,
    earning::EarnRequest,
    engine::CoinEngine,
    error::Rejection,
    event::CoinEvent,
    rule_registry::CoinRule,
};
use std::sync::Arc;

fn build() -> (CoinEngine, Arc<ManualTimeSource>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let start: DateTime<Utc> = Utc.with_ymd_and_hms(2026, 6, 15, 14, 0, 0).unwrap();
    let time = Arc::new(ManualTimeSource::new(start));
    let engine = CoinEngine::build_test_at(time.clone()).expect("build_test_at failed");
    engine
        .upsert_rule(&CoinRule::new("scroll", 1).max_per_day(50))
        .unwrap();
    (engine, time)
}

fn scroll(engine: &CoinEngine, user: &str) -> coin_core::earning::EarnOutcome {
    engine.earn_coins(&EarnRequest::new(user, "scroll")).unwrap()
}

#[test]
fn scroll_cooldown_is_enforced_server_side() {
    let (engine, time) = build();

    assert!(scroll(&engine, "ana").success);
    time.advance(Duration::seconds(30));
    let early = scroll(&engine, "ana");
    assert!(!early.success);
    assert_eq!(early.reason, Some(Rejection::RateLimited));

    time.advance(Duration::seconds(120));
    assert!(scroll(&engine, "ana").success);
    assert_eq!(engine.get_balance("ana").unwrap().balance, 2);
}

#[test]
fn retrying_during_cooldown_pushes_it_back() {
    let (engine, time) = build();

    assert!(scroll(&engine, "rui").success);
    time.advance(Duration::seconds(60));
    assert_eq!(scroll(&engine, "rui").reason, Some(Rejection::RateLimited));

    // Two minutes after the first success, but only one after the retry.
    time.advance(Duration::seconds(60));
    assert_eq!(scroll(&engine, "rui").reason, Some(Rejection::RateLimited));
    assert_eq!(engine.get_balance("rui").unwrap().balance, 1);
}

#[test]
fn session_cap_limits_attempts() {
    let (engine, time) = build();
    for _ in 0..3 {
        assert!(scroll(&engine, "bia").success);
        time.advance(Duration::minutes(5));
    }
    assert_eq!(scroll(&engine, "bia").reason, Some(Rejection::RateLimited));

    time.advance(Duration::hours(1));
    assert!(scroll(&engine, "bia").success);
}

#[test]
fn burst_is_flagged_persisted_and_locked_out() {
    let (engine, time) = build();

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(scroll(&engine, "bot"));
        time.advance(Duration::seconds(1));
    }
    assert!(outcomes[0].success);
    assert!(outcomes[1..5].iter().all(|o| o.reason == Some(Rejection::RateLimited)));
    assert_eq!(outcomes[5].reason, Some(Rejection::Suspicious));

    let flags = engine.suspicious_flags(Some("bot")).unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].action, "scroll");
    assert_eq!(flags[0].attempts, 6);
    assert!(engine.suspicious_flags(Some("ana")).unwrap().is_empty());

    let events: Vec<CoinEvent> = engine
        .events_for_user("bot")
        .unwrap()
        .iter()
        .map(|e| e.decode().unwrap())
        .collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, CoinEvent::SuspiciousActivity { attempts: 6, .. })));

    // Locked out for 15 minutes even though the cooldown has long passed.
    time.advance(Duration::minutes(10));
    assert_eq!(scroll(&engine, "bot").reason, Some(Rejection::RateLimited));
    time.advance(Duration::minutes(6));
    assert!(scroll(&engine, "bot").success);
    assert_eq!(engine.get_balance("bot").unwrap().balance, 2);
}

#[test]
fn guard_state_is_per_user() {
    let (engine, _) = build();
    assert!(scroll(&engine, "ana").success);
    assert!(scroll(&engine, "caio").success);
    assert_eq!(scroll(&engine, "ana").reason, Some(Rejection::RateLimited));
}

#[test]
fn operator_can_lift_a_lockout() {
    let (engine, time) = build();
    for _ in 0..6 {
        scroll(&engine, "bot");
    }
    time.advance(Duration::minutes(3));
    assert_eq!(scroll(&engine, "bot").reason, Some(Rejection::RateLimited));

    engine.reset_guard("bot", "scroll");
    assert!(scroll(&engine, "bot").success);
}
