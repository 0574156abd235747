//! Persistent, hot-reloadable configuration with environment overrides and
//! defaults (spec §3 Config, §4.2). Backed by the single `config` row in
//! the Store; env vars only seed the row on first initialization (spec §6).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store::Store;

const CONFIG_KEY: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl RollupInterval {
    pub fn as_millis(self) -> u64 {
        self.as_seconds() * 1000
    }

    pub fn as_seconds(self) -> u64 {
        match self {
            RollupInterval::OneMinute => 60,
            RollupInterval::FiveMinutes => 300,
            RollupInterval::FifteenMinutes => 900,
            RollupInterval::OneHour => 3600,
        }
    }

    fn parse_token(token: &str) -> Option<Self> {
        match token {
            "1m" => Some(RollupInterval::OneMinute),
            "5m" => Some(RollupInterval::FiveMinutes),
            "15m" => Some(RollupInterval::FifteenMinutes),
            "1h" => Some(RollupInterval::OneHour),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub max_requests: u32,
    pub window_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub limits: HashMap<String, EndpointLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub rollup_interval: RollupInterval,
    pub retention_days: u32,
    pub rollup_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub parser_timeout_seconds: u32,
    pub feed_timeout_seconds: u32,
    pub cleanup_interval_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub metrics: MetricsConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert("/v1/events".to_owned(), EndpointLimit { max_requests: 120, window_seconds: 60 });
        limits.insert("/v1/ws".to_owned(), EndpointLimit { max_requests: 30, window_seconds: 60 });
        limits.insert("default".to_owned(), EndpointLimit { max_requests: 300, window_seconds: 60 });
        Config {
            metrics: MetricsConfig {
                rollup_interval: RollupInterval::FiveMinutes,
                retention_days: 30,
                rollup_retention_days: 90,
            },
            rate_limit: RateLimitConfig { enabled: true, limits },
            monitoring: MonitoringConfig {
                parser_timeout_seconds: 120,
                feed_timeout_seconds: 120,
                cleanup_interval_hours: 6,
            },
        }
    }
}

/// A partial config patch for `ConfigManager::update` — every field
/// optional, deep-merged into the in-memory config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub metrics: Option<MetricsPatch>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitPatch>,
    #[serde(default)]
    pub monitoring: Option<MonitoringPatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsPatch {
    pub rollup_interval: Option<RollupInterval>,
    pub retention_days: Option<u32>,
    pub rollup_retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitPatch {
    pub enabled: Option<bool>,
    pub limits: Option<HashMap<String, EndpointLimit>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringPatch {
    pub parser_timeout_seconds: Option<u32>,
    pub feed_timeout_seconds: Option<u32>,
    pub cleanup_interval_hours: Option<u32>,
}

pub struct ConfigManager {
    store: Arc<Store>,
    cache: RwLock<Config>,
}

impl ConfigManager {
    /// Ensure the config row exists; on first initialization, materialize
    /// defaults and apply environment overrides (known keys only,
    /// out-of-range values ignored).
    pub fn new(store: Arc<Store>) -> Result<Self, ConfigError> {
        let existing = store.config_get_raw(CONFIG_KEY)?;
        let config = match existing {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => {
                let mut cfg = Config::default();
                apply_env_overrides(&mut cfg);
                persist(&store, &cfg)?;
                cfg
            }
        };
        Ok(ConfigManager { store, cache: RwLock::new(config) })
    }

    /// Deep copy of the current config.
    pub fn get(&self) -> Config {
        self.cache.read().expect("config lock poisoned").clone()
    }

    /// Deep-merge `patch` into memory and persist immediately.
    pub fn update(&self, patch: ConfigPatch) -> Result<Config, ConfigError> {
        let mut guard = self.cache.write().expect("config lock poisoned");
        if let Some(m) = patch.metrics {
            if let Some(v) = m.rollup_interval {
                guard.metrics.rollup_interval = v;
            }
            if let Some(v) = m.retention_days {
                guard.metrics.retention_days = v;
            }
            if let Some(v) = m.rollup_retention_days {
                guard.metrics.rollup_retention_days = v;
            }
        }
        if let Some(rl) = patch.rate_limit {
            if let Some(v) = rl.enabled {
                guard.rate_limit.enabled = v;
            }
            if let Some(v) = rl.limits {
                for (k, limit) in v {
                    guard.rate_limit.limits.insert(k, limit);
                }
            }
        }
        if let Some(mon) = patch.monitoring {
            if let Some(v) = mon.parser_timeout_seconds {
                guard.monitoring.parser_timeout_seconds = v;
            }
            if let Some(v) = mon.feed_timeout_seconds {
                guard.monitoring.feed_timeout_seconds = v;
            }
            if let Some(v) = mon.cleanup_interval_hours {
                guard.monitoring.cleanup_interval_hours = v;
            }
        }
        persist(&self.store, &guard)?;
        Ok(guard.clone())
    }
}

fn persist(store: &Store, config: &Config) -> Result<(), ConfigError> {
    let raw = serde_json::to_string(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    let now = chrono::Utc::now().to_rfc3339();
    store.config_set_raw(CONFIG_KEY, &raw, &now)?;
    Ok(())
}

fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("METRICS_ROLLUP_INTERVAL") {
        if let Some(interval) = RollupInterval::parse_token(&v) {
            cfg.metrics.rollup_interval = interval;
        } else {
            tracing::warn!(value = %v, "ignoring out-of-range METRICS_ROLLUP_INTERVAL");
        }
    }
    if let Ok(v) = std::env::var("METRICS_RETENTION_DAYS") {
        match v.parse::<u32>() {
            Ok(days) if (1..=365).contains(&days) => cfg.metrics.retention_days = days,
            _ => tracing::warn!(value = %v, "ignoring out-of-range METRICS_RETENTION_DAYS"),
        }
    }
    if let Ok(v) = std::env::var("ROLLUP_RETENTION_DAYS") {
        match v.parse::<u32>() {
            Ok(days) if (1..=365).contains(&days) => cfg.metrics.rollup_retention_days = days,
            _ => tracing::warn!(value = %v, "ignoring out-of-range ROLLUP_RETENTION_DAYS"),
        }
    }
    if let Ok(v) = std::env::var("RATE_LIMIT_ENABLED") {
        match v.parse::<bool>() {
            Ok(enabled) => cfg.rate_limit.enabled = enabled,
            Err(_) => tracing::warn!(value = %v, "ignoring invalid RATE_LIMIT_ENABLED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_init_materializes_defaults_and_persists() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mgr = ConfigManager::new(store.clone()).unwrap();
        let cfg = mgr.get();
        assert_eq!(cfg.metrics.retention_days, 30);
        assert!(store.config_get_raw("main").unwrap().is_some());
    }

    #[test]
    fn update_deep_merges_and_persists() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mgr = ConfigManager::new(store.clone()).unwrap();
        let patch = ConfigPatch {
            metrics: Some(MetricsPatch { retention_days: Some(10), ..Default::default() }),
            ..Default::default()
        };
        let updated = mgr.update(patch).unwrap();
        assert_eq!(updated.metrics.retention_days, 10);
        assert_eq!(updated.metrics.rollup_retention_days, 90);

        // Re-reading from the store reflects the merge, not just memory.
        let raw = store.config_get_raw("main").unwrap().unwrap();
        let persisted: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.metrics.retention_days, 10);
    }

    #[test]
    fn existing_row_is_not_overwritten_by_env_on_restart() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        {
            let mgr = ConfigManager::new(store.clone()).unwrap();
            mgr.update(ConfigPatch {
                metrics: Some(MetricsPatch { retention_days: Some(5), ..Default::default() }),
                ..Default::default()
            })
            .unwrap();
        }
        std::env::set_var("METRICS_RETENTION_DAYS", "200");
        let mgr2 = ConfigManager::new(store).unwrap();
        assert_eq!(mgr2.get().metrics.retention_days, 5);
        std::env::remove_var("METRICS_RETENTION_DAYS");
    }
}
