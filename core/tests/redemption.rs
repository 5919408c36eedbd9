//! Integration tests for the redemption engine.
//!
//! 1. A successful redeem debits exactly the cost and decrements stock by 1
//! 2. InsufficientBalance leaves stock and balance untouched
//! 3. Missing, inactive and sold-out products are refused
//! 4. Unlimited stock never moves
//! 5. Racing for the last unit: one winner, nobody charged without stock

use chrono::{TimeZone, Utc};
use coin_core::{
    clock::ManualTimeSource,
    earning::EarnRequest,
    engine::CoinEngine,
    error::{CoinError, Rejection},
    redemption::CoinProduct,
    rule_registry::CoinRule,
    types::CancelToken,
};
use std::sync::Arc;

fn build() -> CoinEngine {
    let time = Arc::new(ManualTimeSource::new(
        Utc.with_ymd_and_hms(2026, 9, 1, 15, 0, 0).unwrap(),
    ));
    let engine = CoinEngine::build_test_at(time).expect("build_test_at failed");
    engine.upsert_rule(&CoinRule::new("grant", 100)).unwrap();
    engine
}

fn fund(engine: &CoinEngine, user: &str, amount: i64) {
    let outcome = engine
        .earn_coins(&EarnRequest::new(user, "grant").amount(amount))
        .unwrap();
    assert!(outcome.success);
}

fn product(id: &str, cost: i64, stock: Option<i64>) -> CoinProduct {
    CoinProduct {
        id:            id.to_string(),
        name:          format!("Product {id}"),
        cost,
        stock,
        product_type:  "physical".to_string(),
        is_active:     true,
        display_order: 0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: successful redeem
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn redeem_debits_cost_and_decrements_stock() {
    let engine = build();
    engine.upsert_product(&product("mousepad", 90, Some(5))).unwrap();
    fund(&engine, "ana", 200);

    let outcome = engine.spend_coins("ana", "mousepad").unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.cost_paid, 90);
    assert_eq!(outcome.balance, Some(110));
    assert_eq!(outcome.remaining_stock, Some(4));

    assert_eq!(engine.product("mousepad").unwrap().unwrap().stock, Some(4));
    let account = engine.get_balance("ana").unwrap();
    assert_eq!(account.balance, 110);
    assert_eq!(account.total_spent, 90);

    let records = engine.redemption_history("ana").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(Some(records[0].id.clone()), outcome.redemption_id);
    assert_eq!(Some(records[0].transaction_id.clone()), outcome.transaction_id);

    let spent = &engine.transaction_history("ana", 1).unwrap()[0];
    assert_eq!(spent.amount, -90);
    assert_eq!(spent.reason, "mousepad");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: insufficient balance
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn insufficient_balance_leaves_stock_unchanged() {
    let engine = build();
    engine.upsert_product(&product("headset", 500, Some(2))).unwrap();
    fund(&engine, "bia", 499);

    let outcome = engine.spend_coins("bia", "headset").unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(Rejection::InsufficientBalance));
    assert_eq!(outcome.message, Rejection::InsufficientBalance.user_message());

    assert_eq!(engine.product("headset").unwrap().unwrap().stock, Some(2));
    assert_eq!(engine.get_balance("bia").unwrap().balance, 499);
    assert!(engine.redemption_history("bia").unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: product gates
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn missing_inactive_and_sold_out_products_are_refused() {
    let engine = build();
    fund(&engine, "caio", 1000);

    let mut retired = product("retired", 10, None);
    retired.is_active = false;
    engine.upsert_product(&retired).unwrap();
    engine.upsert_product(&product("sold-out", 10, Some(0))).unwrap();

    let cases = [
        ("ghost", Rejection::ProductNotFound),
        ("retired", Rejection::ProductInactive),
        ("sold-out", Rejection::OutOfStock),
    ];
    for (id, expected) in cases {
        let outcome = engine.spend_coins("caio", id).unwrap();
        assert_eq!(outcome.reason, Some(expected), "product {id}");
    }
    assert_eq!(engine.get_balance("caio").unwrap().balance, 1000);

    let listed: Vec<String> = engine.list_products().unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(listed, vec!["sold-out".to_string()]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: unlimited stock
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unlimited_stock_stays_unlimited() {
    let engine = build();
    engine.upsert_product(&product("coupon", 25, None)).unwrap();
    fund(&engine, "dani", 100);

    for _ in 0..4 {
        let outcome = engine.spend_coins("dani", "coupon").unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.remaining_stock, None);
    }
    assert_eq!(engine.spend_coins("dani", "coupon").unwrap().reason, Some(Rejection::InsufficientBalance));
    assert_eq!(engine.product("coupon").unwrap().unwrap().stock, None);
}

#[test]
fn cancelled_redeem_commits_nothing() {
    let engine = build();
    engine.upsert_product(&product("keychain", 10, Some(1))).unwrap();
    fund(&engine, "eli", 50);

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = engine.spend_coins_cancellable("eli", "keychain", &cancel);
    assert!(matches!(result, Err(CoinError::Cancelled)));
    assert_eq!(engine.product("keychain").unwrap().unwrap().stock, Some(1));
    assert_eq!(engine.get_balance("eli").unwrap().balance, 50);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: contention on the last unit
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn last_unit_goes_to_exactly_one_redeemer() {
    let engine = build();
    engine.upsert_product(&product("beta-key", 40, Some(1))).unwrap();
    let users: Vec<String> = (0..10).map(|i| format!("user-{i}")).collect();
    for user in &users {
        fund(&engine, user, 100);
    }

    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = users
            .iter()
            .map(|user| {
                let engine = &engine;
                s.spawn(move || engine.spend_coins(user, "beta-key").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|o| o.success).count(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| o.reason == Some(Rejection::OutOfStock)).count(),
        9
    );
    assert_eq!(engine.product("beta-key").unwrap().unwrap().stock, Some(0));
    let recorded = engine
        .store()
        .read("test.count", |db| db.redemption_count_for_product("beta-key"))
        .unwrap();
    assert_eq!(recorded, 1);

    let total: i64 = users
        .iter()
        .map(|u| engine.get_balance(u).unwrap().balance)
        .sum();
    assert_eq!(total, 10 * 100 - 40);
    assert!(engine.reconcile_all().unwrap().is_clean());
}
