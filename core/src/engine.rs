//! The coin engine: the single entry point the storefront calls.
//!
//! WIRING (leaf-first):
//!   store → toggle, rules, streaks, guard → ledger → earning
//!         → redemption, daily codes → reconciler
//!
//! RULES:
//!   - Every user-facing operation is gated on the system toggle. When the
//!     coin system is off they return `SystemDisabled` and touch nothing.
//!   - Administrative writes, reconciliation and audit queries are not gated,
//!     so operators can still switch the system back on and inspect it.
//!   - All timestamps come from the injected `TimeSource`.

use crate::{
    anti_abuse::AntiAbuseGuard,
    clock::{RewardClock, RewardPeriod, SystemTimeSource, TimeSource},
    config::{EngineConfig, StreakConfig},
    daily_code::{ClaimOutcome, CodeStreakStatus, CurrentCode, DailyCodeEngine},
    earning::{ActionTimer, DailyLoginOutcome, EarnOutcome, EarnRequest, EarningOrchestrator},
    error::CoinResult,
    event::EventLogEntry,
    ledger::{CoinTransaction, Ledger, UserCoinAccount},
    reconciliation::{Reconciler, ReconciliationReport, UserReconciliation},
    redemption::{CoinProduct, RedemptionEngine, RedemptionOutcome, RedemptionRecord},
    rng::CodeRng,
    rule_registry::{CoinRule, RuleRegistry},
    store::{CoinStore, SuspiciousFlag},
    streak_tracker::{LoginStreakStatus, StreakTracker},
    system_toggle::SystemToggle,
    types::CancelToken,
};
use std::{sync::Arc, time::Duration};

pub struct CoinEngine {
    store:      Arc<CoinStore>,
    time:       Arc<dyn TimeSource>,
    clock:      RewardClock,
    config:     EngineConfig,
    toggle:     Arc<SystemToggle>,
    rules:      Arc<RuleRegistry>,
    streaks:    Arc<StreakTracker>,
    guard:      Arc<AntiAbuseGuard>,
    ledger:     Ledger,
    earning:    Arc<EarningOrchestrator>,
    redemption: RedemptionEngine,
    codes:      DailyCodeEngine,
    reconciler: Reconciler,
}

impl CoinEngine {
    /// Wire every component over an already-migrated store.
    pub fn build(
        store: Arc<CoinStore>,
        config: EngineConfig,
        time: Arc<dyn TimeSource>,
    ) -> CoinResult<Self> {
        Self::build_with_rng(store, config, time, CodeRng::from_entropy())
    }

    pub fn build_with_rng(
        store: Arc<CoinStore>,
        config: EngineConfig,
        time: Arc<dyn TimeSource>,
        rng: CodeRng,
    ) -> CoinResult<Self> {
        config.validate()?;
        let clock = RewardClock::from_config(&config.clock)?;
        let ttl = Duration::from_secs(config.cache.ttl_secs);

        let toggle = Arc::new(SystemToggle::new(store.clone(), time.clone(), ttl));
        let rules = Arc::new(RuleRegistry::new(store.clone(), time.clone(), ttl));
        let streaks = Arc::new(StreakTracker::new(store.clone(), time.clone(), config.streak, ttl));
        let guard = Arc::new(AntiAbuseGuard::new(config.guard.clone()));
        let ledger = Ledger::new(store.clone(), time.clone());
        let earning = Arc::new(EarningOrchestrator::new(
            store.clone(),
            time.clone(),
            clock,
            toggle.clone(),
            guard.clone(),
            rules.clone(),
            streaks.clone(),
            config.daily_login_action.clone(),
        ));
        let redemption = RedemptionEngine::new(store.clone(), time.clone(), toggle.clone());
        let codes = DailyCodeEngine::new(
            store.clone(),
            time.clone(),
            clock,
            toggle.clone(),
            rules.clone(),
            earning.clone(),
            config.codes.clone(),
            rng,
        );
        let reconciler = Reconciler::new(store.clone());

        log::info!(
            "engine: built (zone={}, cutoff={:02}:00, cache ttl={}s)",
            config.clock.timezone, config.clock.cutoff_hour, config.cache.ttl_secs
        );
        Ok(Self {
            store,
            time,
            clock,
            config,
            toggle,
            rules,
            streaks,
            guard,
            ledger,
            earning,
            redemption,
            codes,
            reconciler,
        })
    }

    /// In-memory store, test config, wall-clock time, seeded code generator.
    pub fn build_test() -> CoinResult<Self> {
        Self::build_test_at(Arc::new(SystemTimeSource))
    }

    pub fn build_test_at(time: Arc<dyn TimeSource>) -> CoinResult<Self> {
        let store = CoinStore::in_memory()?;
        store.migrate()?;
        Self::build_with_rng(Arc::new(store), EngineConfig::default_test(), time, CodeRng::from_seed(42))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &CoinStore {
        &self.store
    }

    // ── Earning ───────────────────────────────────────────────────

    pub fn earn_coins(&self, req: &EarnRequest) -> CoinResult<EarnOutcome> {
        self.earning.earn(req, &CancelToken::never())
    }

    pub fn earn_coins_cancellable(&self, req: &EarnRequest, cancel: &CancelToken) -> CoinResult<EarnOutcome> {
        self.earning.earn(req, cancel)
    }

    pub fn process_daily_login(&self, user_id: &str) -> CoinResult<DailyLoginOutcome> {
        self.earning.daily_login(user_id)
    }

    // ── Spending ──────────────────────────────────────────────────

    pub fn spend_coins(&self, user_id: &str, product_id: &str) -> CoinResult<RedemptionOutcome> {
        self.redemption.redeem(user_id, product_id, &CancelToken::never())
    }

    pub fn spend_coins_cancellable(
        &self,
        user_id: &str,
        product_id: &str,
        cancel: &CancelToken,
    ) -> CoinResult<RedemptionOutcome> {
        self.redemption.redeem(user_id, product_id, cancel)
    }

    // ── Reward clock ──────────────────────────────────────────────

    /// The reward-day in progress. Every countdown reads this.
    pub fn reward_period(&self) -> CoinResult<RewardPeriod> {
        self.toggle.ensure_enabled()?;
        Ok(self.current_period())
    }

    /// Operator view of the reward-day, available while the system is off.
    pub fn current_period(&self) -> RewardPeriod {
        self.clock.period_at(self.time.now())
    }

    pub fn get_daily_timer(&self, user_id: &str) -> CoinResult<ActionTimer> {
        self.get_action_timer(user_id, &self.config.daily_login_action)
    }

    pub fn get_action_timer(&self, user_id: &str, action: &str) -> CoinResult<ActionTimer> {
        self.toggle.ensure_enabled()?;
        self.earning.action_timer(user_id, action)
    }

    // ── Daily codes ───────────────────────────────────────────────

    pub fn get_current_code(&self) -> CoinResult<CurrentCode> {
        self.codes.current_code()
    }

    pub fn get_streak_status(&self, user_id: &str) -> CoinResult<CodeStreakStatus> {
        self.toggle.ensure_enabled()?;
        self.codes.streak_status(user_id)
    }

    pub fn claim_code(&self, user_id: &str, code: &str) -> CoinResult<ClaimOutcome> {
        self.codes.claim(user_id, code, &CancelToken::never())
    }

    pub fn claim_code_cancellable(&self, user_id: &str, code: &str, cancel: &CancelToken) -> CoinResult<ClaimOutcome> {
        self.codes.claim(user_id, code, cancel)
    }

    pub fn claim_daily_bonus(&self, user_id: &str) -> CoinResult<ClaimOutcome> {
        self.codes.claim_daily_bonus(user_id, &CancelToken::never())
    }

    // ── Account queries ───────────────────────────────────────────

    pub fn get_login_streak(&self, user_id: &str) -> CoinResult<LoginStreakStatus> {
        self.toggle.ensure_enabled()?;
        let today = self.clock.reward_date(self.time.now());
        self.streaks.status(user_id, today)
    }

    pub fn get_balance(&self, user_id: &str) -> CoinResult<UserCoinAccount> {
        self.toggle.ensure_enabled()?;
        self.ledger.get_account(user_id)
    }

    pub fn transaction_history(&self, user_id: &str, limit: usize) -> CoinResult<Vec<CoinTransaction>> {
        self.toggle.ensure_enabled()?;
        self.ledger.history(user_id, limit)
    }

    pub fn redemption_history(&self, user_id: &str) -> CoinResult<Vec<RedemptionRecord>> {
        self.toggle.ensure_enabled()?;
        self.redemption.history(user_id)
    }

    pub fn list_products(&self) -> CoinResult<Vec<CoinProduct>> {
        self.toggle.ensure_enabled()?;
        self.redemption.products()
    }

    // ── Administration ────────────────────────────────────────────

    pub fn upsert_rule(&self, rule: &CoinRule) -> CoinResult<()> {
        self.rules.upsert(rule)
    }

    /// Returns false when no rule exists for `action`.
    pub fn set_rule_active(&self, action: &str, is_active: bool) -> CoinResult<bool> {
        self.rules.set_active(action, is_active)
    }

    pub fn list_rules(&self) -> CoinResult<Vec<CoinRule>> {
        self.rules.all()
    }

    pub fn upsert_product(&self, product: &CoinProduct) -> CoinResult<()> {
        self.redemption.upsert_product(product)
    }

    pub fn product(&self, product_id: &str) -> CoinResult<Option<CoinProduct>> {
        self.redemption.product(product_id)
    }

    pub fn set_system_enabled(&self, enabled: bool) -> CoinResult<()> {
        self.toggle.set_enabled(enabled)
    }

    pub fn is_system_enabled(&self) -> CoinResult<bool> {
        self.toggle.is_enabled()
    }

    pub fn set_streak_config(&self, config: StreakConfig) -> CoinResult<()> {
        self.streaks.set_config(config)
    }

    pub fn streak_config(&self) -> CoinResult<StreakConfig> {
        self.streaks.config()
    }

    /// Lift a guard lockout for one user and action.
    pub fn reset_guard(&self, user_id: &str, action: &str) {
        self.guard.reset(user_id, action);
    }

    /// Drop idle guard state. Returns how many entries were removed.
    pub fn sweep_guard(&self) -> usize {
        self.guard.sweep_idle(self.time.now())
    }

    // ── Audit ─────────────────────────────────────────────────────

    pub fn reconcile_user(&self, user_id: &str) -> CoinResult<Option<UserReconciliation>> {
        self.reconciler.reconcile_user(user_id)
    }

    pub fn reconcile_all(&self) -> CoinResult<ReconciliationReport> {
        self.reconciler.reconcile_all()
    }

    pub fn suspicious_flags(&self, user_id: Option<&str>) -> CoinResult<Vec<SuspiciousFlag>> {
        self.store.read("audit.flags", |db| db.suspicious_flags(user_id))
    }

    pub fn events_for_user(&self, user_id: &str) -> CoinResult<Vec<EventLogEntry>> {
        self.store.read("audit.events", |db| db.events_for_user(user_id))
    }

    pub fn recent_events(&self, limit: usize) -> CoinResult<Vec<EventLogEntry>> {
        self.store.read("audit.recent", |db| db.recent_events(limit))
    }
}
