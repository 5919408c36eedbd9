use crate::{
    redemption::CoinProduct,
    rule_registry::CoinRule,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Reward clock ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// IANA zone the reward-day is anchored to.
    pub timezone: String,
    /// Local hour (0–23) at which a new reward-day starts.
    pub cutoff_hour: u32,
}

// ── Storage ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a caller waits for the connection before giving up.
    pub lock_timeout_ms: u64,
    /// SQLite busy handler timeout for file-backed databases.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for cached rules and settings. 0 disables caching.
    pub ttl_secs: u64,
}

// ── Anti-abuse ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Minimum gap between two attempts.
    pub cooldown_ms: u64,
    /// Attempts allowed per session window, rejected ones included.
    pub session_cap: u32,
    pub session_window_secs: u64,
    /// Attempts (accepted or not) inside `burst_window_secs` above which
    /// the caller is flagged as suspicious.
    pub burst_ceiling: u32,
    pub burst_window_secs: u64,
    /// Action-specific lockout applied after a suspicious flag.
    pub lockout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub default_policy: GuardPolicy,
    #[serde(default)]
    pub actions: HashMap<String, GuardPolicy>,
    /// Idle entries are swept once every this many checks. 0 disables.
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
}

fn default_sweep_every() -> u64 {
    1_000
}

impl GuardConfig {
    pub fn policy_for(&self, action: &str) -> &GuardPolicy {
        self.actions.get(action).unwrap_or(&self.default_policy)
    }
}

// ── Daily codes ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Hours after issuance during which the code is advertised as claimable.
    pub claim_window_hours: i64,
    /// Hours after issuance during which the code still counts toward a chain.
    pub validity_hours: i64,
    pub code_length: usize,
    /// Rule action credited when a code is claimed.
    pub reward_action: String,
}

// ── Streak ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StreakConfig {
    pub max_multiplier: f64,
    pub multiplier_increment: f64,
}

impl StreakConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_multiplier.is_finite() || self.max_multiplier < 1.0 {
            return Err(format!("max_multiplier must be >= 1.0, got {}", self.max_multiplier));
        }
        if !self.multiplier_increment.is_finite() || self.multiplier_increment < 0.0 {
            return Err(format!(
                "multiplier_increment must be >= 0.0, got {}",
                self.multiplier_increment
            ));
        }
        Ok(())
    }
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            max_multiplier: 2.0,
            multiplier_increment: 0.1,
        }
    }
}

// ── Seed catalogs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct RuleCatalogFile {
    rules: Vec<CoinRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductCatalogFile {
    products: Vec<CoinProduct>,
}

// ── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub clock: ClockConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub guard: GuardConfig,
    pub codes: CodeConfig,
    /// Used until an administrator writes a streak setting.
    #[serde(default)]
    pub streak: StreakConfig,
    pub daily_login_action: String,
}

impl EngineConfig {
    /// Load from `<data_dir>/engine.json`.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Self::from_json(&content).map_err(|e| anyhow::anyhow!("{path}: {e}"))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.timezone()?;
        if self.clock.cutoff_hour > 23 {
            anyhow::bail!("clock.cutoff_hour must be 0-23, got {}", self.clock.cutoff_hour);
        }
        self.streak.validate().map_err(anyhow::Error::msg)?;
        if self.codes.code_length == 0 {
            anyhow::bail!("codes.code_length must be > 0");
        }
        if self.codes.claim_window_hours <= 0 {
            anyhow::bail!("codes.claim_window_hours must be > 0");
        }
        if self.codes.validity_hours < self.codes.claim_window_hours {
            anyhow::bail!("codes.validity_hours must cover the claim window");
        }
        let policies = std::iter::once(("default", &self.guard.default_policy))
            .chain(self.guard.actions.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, policy) in policies {
            if policy.session_cap == 0 || policy.burst_ceiling == 0 {
                anyhow::bail!("guard policy '{name}' must allow at least one attempt");
            }
            if policy.session_window_secs == 0 || policy.burst_window_secs == 0 {
                anyhow::bail!("guard policy '{name}' windows must be > 0");
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.clock
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {e}", self.clock.timezone))
    }

    /// Config with hardcoded defaults for use in unit tests.
    ///
    /// The default guard policy is permissive so tests exercise caps and
    /// cooldowns; `scroll` carries the production-style passive policy.
    pub fn default_test() -> Self {
        let mut actions = HashMap::new();
        actions.insert(
            "scroll".to_string(),
            GuardPolicy {
                cooldown_ms:         120_000,
                session_cap:         3,
                session_window_secs: 3_600,
                burst_ceiling:       5,
                burst_window_secs:   60,
                lockout_secs:        900,
            },
        );

        Self {
            clock: ClockConfig {
                timezone:    "America/Sao_Paulo".into(),
                cutoff_hour: 20,
            },
            store: StoreConfig::default(),
            cache: CacheConfig { ttl_secs: 30 },
            guard: GuardConfig {
                default_policy: GuardPolicy {
                    cooldown_ms:         0,
                    session_cap:         10_000,
                    session_window_secs: 3_600,
                    burst_ceiling:       10_000,
                    burst_window_secs:   60,
                    lockout_secs:        60,
                },
                actions,
                sweep_every: 1_000,
            },
            codes: CodeConfig {
                claim_window_hours: 4,
                validity_hours:     48,
                code_length:        8,
                reward_action:      "daily_code".into(),
            },
            streak: StreakConfig {
                max_multiplier:       2.0,
                multiplier_increment: 0.1,
            },
            daily_login_action: "daily_login".into(),
        }
    }
}

/// Load `<data_dir>/rules.json`.
pub fn load_rule_catalog(data_dir: &str) -> anyhow::Result<Vec<CoinRule>> {
    let path = format!("{data_dir}/rules.json");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let file: RuleCatalogFile = serde_json::from_str(&content)?;
    Ok(file.rules)
}

/// Load `<data_dir>/products.json`.
pub fn load_product_catalog(data_dir: &str) -> anyhow::Result<Vec<CoinProduct>> {
    let path = format!("{data_dir}/products.json");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let file: ProductCatalogFile = serde_json::from_str(&content)?;
    Ok(file.products)
}
