//! Platform configuration (spec §6 enumeration), loaded from a TOML file
//! with `ARB_`-prefixed environment-variable overrides.
//!
//! Grounded on the teacher's `ServiceConfig::load` (`config-crate` +
//! `Environment` source layering), generalized from Torq's per-service
//! TOML sections to this platform's flat configuration surface.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level platform configuration (spec §6).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArbConfig {
    #[serde(default = "defaults::scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    #[serde(default = "defaults::min_spread_pct")]
    pub min_spread_pct: Decimal,
    #[serde(default = "defaults::min_profit")]
    pub min_profit: Decimal,
    #[serde(default = "defaults::max_concurrent_executions")]
    pub max_concurrent_executions: usize,
    #[serde(default = "defaults::order_timeout_seconds")]
    pub order_timeout_seconds: u64,
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff: u32,
    #[serde(default = "defaults::aggregator_cache_ttl_seconds")]
    pub aggregator_cache_ttl_seconds: u64,
    #[serde(default = "defaults::stream_max_len")]
    pub stream_max_len: usize,
    #[serde(default = "defaults::max_opportunity_size")]
    pub max_opportunity_size: Decimal,
    #[serde(default = "defaults::slippage_bps")]
    pub slippage_bps: Decimal,

    pub risk: RiskLimits,

    #[serde(default)]
    pub venues: VenuesConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub watchlist: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_daily_trades: u32,
    pub max_position_risk: Decimal,
    pub max_open_positions: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct VenuesConfig {
    pub enabled: Vec<String>,
    /// Per-venue `{key, secret, passphrase}`. Values here are only ever
    /// the *names* of the env vars to read — never the secrets themselves
    /// (spec §6: "Credentials. Never logged").
    #[serde(default)]
    pub credentials: HashMap<String, VenueCredentialRef>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VenueCredentialRef {
    pub key_env: String,
    pub secret_env: String,
    pub passphrase_env: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SourcesConfig {
    pub enabled: Vec<String>,
}

mod defaults {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub fn scan_interval_seconds() -> u64 {
        1
    }
    pub fn min_spread_pct() -> Decimal {
        dec!(0.001)
    }
    pub fn min_profit() -> Decimal {
        dec!(1)
    }
    pub fn max_concurrent_executions() -> usize {
        8
    }
    pub fn order_timeout_seconds() -> u64 {
        30
    }
    pub fn retry_attempts() -> u32 {
        3
    }
    pub fn retry_base_delay_ms() -> u64 {
        200
    }
    pub fn retry_backoff() -> u32 {
        2
    }
    pub fn aggregator_cache_ttl_seconds() -> u64 {
        30
    }
    pub fn stream_max_len() -> usize {
        10_000
    }
    pub fn max_opportunity_size() -> Decimal {
        dec!(1)
    }
    pub fn slippage_bps() -> Decimal {
        dec!(5)
    }
}

impl ArbConfig {
    /// Load configuration from `path` (default `config/arbitrage.toml`),
    /// layering `ARB_`-prefixed environment variable overrides on top
    /// (e.g. `ARB_MIN_SPREAD_PCT=0.002`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = path.unwrap_or_else(|| Path::new("config/arbitrage.toml"));

        let builder = Config::builder()
            .add_source(File::from(base).required(true))
            .add_source(
                Environment::with_prefix("ARB")
                    .separator("_")
                    .try_parsing(true),
            );

        let config = builder.build().context("failed to build configuration")?;
        config
            .try_deserialize()
            .context("failed to deserialize ArbConfig")
    }
}

/// Convenience wrapper matching the teacher's `load_config` entry point.
pub fn load_config(path: Option<&Path>) -> Result<ArbConfig> {
    ArbConfig::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_applies_defaults_for_omitted_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arbitrage.toml");
        fs::write(
            &path,
            r#"
[risk]
max_position_size = "1000"
max_daily_loss = "200"
max_daily_trades = 50
max_position_risk = "0.02"
max_open_positions = 5

watchlist = ["BTC/USDT", "ETH/USDT"]
"#,
        )
        .unwrap();

        let cfg = ArbConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.scan_interval_seconds, 1);
        assert_eq!(cfg.max_concurrent_executions, 8);
        assert_eq!(cfg.watchlist, vec!["BTC/USDT", "ETH/USDT"]);
        assert_eq!(cfg.risk.max_daily_trades, 50);
    }

    #[test]
    fn environment_override_takes_precedence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arbitrage.toml");
        fs::write(
            &path,
            r#"
[risk]
max_position_size = "1000"
max_daily_loss = "200"
max_daily_trades = 50
max_position_risk = "0.02"
max_open_positions = 5
"#,
        )
        .unwrap();

        std::env::set_var("ARB_SCAN_INTERVAL_SECONDS", "5");
        let cfg = ArbConfig::load(Some(&path)).unwrap();
        std::env::remove_var("ARB_SCAN_INTERVAL_SECONDS");

        assert_eq!(cfg.scan_interval_seconds, 5);
    }
}
