//! System toggle: the single on/off switch in front of every engine
//! operation. A missing setting row means the system is enabled.

use crate::{
    cache::TtlCache,
    clock::TimeSource,
    error::{CoinResult, Rejection},
    event::{CoinEvent, EventLogEntry},
    store::CoinStore,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

pub const SYSTEM_TOGGLE_KEY: &str = "coin_system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemToggleSetting {
    pub enabled: bool,
}

pub struct SystemToggle {
    store: Arc<CoinStore>,
    time:  Arc<dyn TimeSource>,
    cache: TtlCache<&'static str, bool>,
}

impl SystemToggle {
    pub fn new(store: Arc<CoinStore>, time: Arc<dyn TimeSource>, ttl: Duration) -> Self {
        Self {
            store,
            time,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn is_enabled(&self) -> CoinResult<bool> {
        self.cache.get_or_try_insert_with(&SYSTEM_TOGGLE_KEY, || {
            let setting: Option<SystemToggleSetting> = self
                .store
                .read("toggle.read", |db| db.setting(SYSTEM_TOGGLE_KEY))?;
            Ok(setting.map_or(true, |s| s.enabled))
        })
    }

    /// `Err(Rejected(SystemDisabled))` when the system is switched off.
    pub fn ensure_enabled(&self) -> CoinResult<()> {
        if self.is_enabled()? {
            Ok(())
        } else {
            Err(Rejection::SystemDisabled.into())
        }
    }

    pub fn set_enabled(&self, enabled: bool) -> CoinResult<()> {
        let now = self.time.now();
        self.store.write("toggle.write", |db| {
            db.put_setting(SYSTEM_TOGGLE_KEY, &SystemToggleSetting { enabled }, now)?;
            let event = CoinEvent::SystemToggled { enabled };
            db.append_event(&EventLogEntry::from_event(&event, now)?)
        })?;
        self.cache.invalidate(&SYSTEM_TOGGLE_KEY);
        log::info!("toggle: coin system {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}
