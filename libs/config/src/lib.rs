//! # Arbitrage Platform Configuration
//!
//! Centralized configuration for the platform's Configuration enumeration
//! (spec §6): scan cadence, risk limits, venue/source enablement, the
//! watchlist, and so on, loaded from a TOML file with environment-variable
//! overrides.
//!
//! Grounded on `libs/config/src/service_config.rs`'s `config-crate` +
//! `Environment` source layering, generalized from Torq's per-service TOML
//! sections (`[services.market_data_relay]`, ...) to this platform's flat
//! `ArbConfig`.

pub mod arb_config;

pub use arb_config::{ArbConfig, RiskLimits, load_config};
