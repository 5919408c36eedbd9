//! Rule registry: per-action earning rules.
//!
//! Rules are written by the admin collaborator and read at evaluation time.
//! Lookups go through a TTL cache that the registry invalidates on every
//! write it performs.

use crate::{
    cache::TtlCache,
    clock::TimeSource,
    error::{CoinError, CoinResult, Rejection},
    event::{CoinEvent, EventLogEntry},
    store::CoinStore,
    types::Coins,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRule {
    pub action:           String,
    pub amount:           Coins,
    #[serde(default)]
    pub max_per_day:      Option<u32>,
    #[serde(default)]
    pub max_per_month:    Option<u32>,
    #[serde(default)]
    pub cooldown_minutes: u32,
    #[serde(default = "default_active")]
    pub is_active:        bool,
}

fn default_active() -> bool {
    true
}

impl CoinRule {
    pub fn new(action: &str, amount: Coins) -> Self {
        Self {
            action: action.to_string(),
            amount,
            max_per_day: None,
            max_per_month: None,
            cooldown_minutes: 0,
            is_active: true,
        }
    }

    pub fn max_per_day(mut self, max: u32) -> Self {
        self.max_per_day = Some(max);
        self
    }

    pub fn max_per_month(mut self, max: u32) -> Self {
        self.max_per_month = Some(max);
        self
    }

    pub fn cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

pub struct RuleRegistry {
    store: Arc<CoinStore>,
    time:  Arc<dyn TimeSource>,
    cache: TtlCache<String, Option<CoinRule>>,
}

impl RuleRegistry {
    pub fn new(store: Arc<CoinStore>, time: Arc<dyn TimeSource>, ttl: Duration) -> Self {
        Self {
            store,
            time,
            cache: TtlCache::new(ttl),
        }
    }

    /// The active rule for `action`. Inactive rules resolve to `None`,
    /// exactly like missing ones.
    pub fn resolve(&self, action: &str) -> CoinResult<Option<CoinRule>> {
        let rule = self.cache.get_or_try_insert_with(&action.to_string(), || {
            self.store.read("rules.resolve", |db| db.rule(action))
        })?;
        Ok(rule.filter(|r| r.is_active))
    }

    pub fn require(&self, action: &str) -> CoinResult<CoinRule> {
        self.resolve(action)?
            .ok_or(CoinError::Rejected(Rejection::UnknownOrInactiveRule))
    }

    /// Every rule, including inactive ones. Not cached.
    pub fn all(&self) -> CoinResult<Vec<CoinRule>> {
        self.store.read("rules.all", |db| db.all_rules())
    }

    pub fn upsert(&self, rule: &CoinRule) -> CoinResult<()> {
        if rule.amount <= 0 {
            return Err(CoinError::InvalidAmount { amount: rule.amount });
        }
        let now = self.time.now();
        self.store.write("rules.upsert", |db| {
            db.upsert_rule(rule, now)?;
            let event = CoinEvent::RuleUpdated {
                action:    rule.action.clone(),
                is_active: rule.is_active,
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)
        })?;
        self.cache.invalidate(&rule.action);
        log::info!("rules: upserted '{}' amount={} active={}", rule.action, rule.amount, rule.is_active);
        Ok(())
    }

    /// Returns false when no rule exists for `action`.
    pub fn set_active(&self, action: &str, is_active: bool) -> CoinResult<bool> {
        let now = self.time.now();
        let updated = self.store.write("rules.set_active", |db| {
            if !db.set_rule_active(action, is_active, now)? {
                return Ok(false);
            }
            let event = CoinEvent::RuleUpdated {
                action: action.to_string(),
                is_active,
            };
            db.append_event(&EventLogEntry::from_event(&event, now)?)?;
            Ok(true)
        })?;
        self.cache.invalidate(&action.to_string());
        Ok(updated)
    }
}
