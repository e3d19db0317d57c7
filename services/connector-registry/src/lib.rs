//! # Connector Registry
//!
//! Owns the live set of venue connectors (spec §4.2): builds them from a
//! fixed catalog of supported venues, connects/disconnects in parallel,
//! refreshes health on a periodic ping, and ranks venues for the
//! Arbitrage Engine via a composite score.
//!
//! Grounded on `libs/messaging/relays/core/src/topics/mod.rs`'s use of
//! `DashMap` for a concurrently-read, occasionally-written registry, and
//! on `services/adapters/src/lib.rs`'s collector-catalog construction
//! pattern, generalized from a fixed compile-time `match` over collector
//! names to this platform's six-venue catalog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arb_types::{ArbResult, Symbol, VenueId};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rust_decimal::prelude::ToPrimitive;
use venue_connector::{CredentialsProvider, VenueConnector, VenueProfile};

/// A symbol polled during health refresh to read a reference 24h volume
/// for the composite score. Most venues quote *something* in USDT/USD;
/// if this symbol is unlisted the entry simply keeps its last-known
/// volume (defaulting to zero).
const REFERENCE_SYMBOL: &str = "BTC/USDT";

struct Entry {
    connector: Arc<dyn VenueConnector>,
    profile: VenueProfile,
    healthy: AtomicBool,
    last_volume_24h: parking_lot::Mutex<Decimal>,
}

/// Static `(taker_fee, trust_score)` catalog for the six reference
/// venues. Trust scores are a coarse, hand-assigned ranking (spot
/// exchanges with the longest uninterrupted uptime and deepest books
/// score highest); operators who disagree can override via
/// `ConnectorRegistry::with_profile` before connecting.
fn default_profile(venue: &str) -> VenueProfile {
    match venue {
        "binance" => VenueProfile {
            taker_fee: dec!(0.001),
            trust_score: 0.95,
        },
        "coinbase" => VenueProfile {
            taker_fee: dec!(0.006),
            trust_score: 0.93,
        },
        "kraken" => VenueProfile {
            taker_fee: dec!(0.0026),
            trust_score: 0.90,
        },
        "okx" => VenueProfile {
            taker_fee: dec!(0.001),
            trust_score: 0.85,
        },
        "gemini" => VenueProfile {
            taker_fee: dec!(0.0035),
            trust_score: 0.85,
        },
        "uniswap_v2" => VenueProfile {
            taker_fee: dec!(0.003),
            trust_score: 0.6,
        },
        _ => VenueProfile {
            taker_fee: dec!(0.005),
            trust_score: 0.5,
        },
    }
}

/// Builds a connector for each catalog venue name. Unknown names are
/// rejected by `ConnectorRegistry::create`.
fn build_connector(
    venue: &str,
    credentials_provider: &dyn CredentialsProvider,
) -> Option<Arc<dyn VenueConnector>> {
    match venue {
        "binance" => Some(connectors_binance::connector(credentials_provider)),
        "coinbase" => Some(connectors_coinbase::connector(credentials_provider)),
        "kraken" => Some(connectors_kraken::connector(credentials_provider)),
        "okx" => Some(connectors_okx::connector(credentials_provider)),
        "gemini" => Some(connectors_gemini::connector(credentials_provider)),
        "uniswap_v2" => Some(connectors_uniswap::connector(credentials_provider)),
        _ => None,
    }
}

/// The full set of venue names the registry knows how to build.
pub const CATALOG: &[&str] = &["binance", "coinbase", "kraken", "okx", "gemini", "uniswap_v2"];

/// Owns and ranks the live connector set (spec §4.2).
pub struct ConnectorRegistry {
    entries: DashMap<VenueId, Entry>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Creates connectors for every name in `venues` (must be drawn from
    /// [`CATALOG`]) using `credentials_provider` for any authenticated
    /// calls. Connectors are created disconnected; call [`connect_all`]
    /// to bring them up.
    ///
    /// [`connect_all`]: ConnectorRegistry::connect_all
    pub fn create(&self, venues: &[&str], credentials_provider: &dyn CredentialsProvider) {
        for &venue in venues {
            let Some(connector) = build_connector(venue, credentials_provider) else {
                tracing::warn!(venue, "unknown venue in catalog request, skipping");
                continue;
            };
            let id = VenueId::new(venue);
            self.entries.insert(
                id,
                Entry {
                    connector,
                    profile: default_profile(venue),
                    healthy: AtomicBool::new(false),
                    last_volume_24h: parking_lot::Mutex::new(Decimal::ZERO),
                },
            );
        }
    }

    /// Registers a connector outside the fixed catalog, already marked
    /// healthy. Used to wire in a test double or a venue this deployment
    /// adds without a matching entry in [`CATALOG`].
    pub fn insert(&self, venue: VenueId, connector: Arc<dyn VenueConnector>, profile: VenueProfile) {
        self.entries.insert(
            venue,
            Entry {
                connector,
                profile,
                healthy: AtomicBool::new(true),
                last_volume_24h: parking_lot::Mutex::new(Decimal::ZERO),
            },
        );
    }

    /// Overrides the composite-score profile for an already-created venue.
    pub fn with_profile(&self, venue: &VenueId, profile: VenueProfile) {
        if let Some(mut entry) = self.entries.get_mut(venue) {
            entry.profile = profile;
        }
    }

    /// Connects every registered connector in parallel. A connector whose
    /// `connect` fails stays marked unhealthy and is skipped by the
    /// aggregator until a later successful ping (spec §4.1 failure
    /// semantics).
    pub async fn connect_all(&self) {
        let tasks: Vec<_> = self
            .entries
            .iter()
            .map(|e| {
                let venue = e.key().clone();
                let connector = e.connector.clone();
                async move {
                    match connector.connect().await {
                        Ok(()) => Some(venue),
                        Err(err) => {
                            tracing::warn!(%venue, error = %err, "connect failed");
                            None
                        }
                    }
                }
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        for connected in results.into_iter().flatten() {
            if let Some(entry) = self.entries.get(&connected) {
                entry.healthy.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Disconnects every registered connector in parallel.
    pub async fn disconnect_all(&self) {
        let tasks: Vec<_> = self
            .entries
            .iter()
            .map(|e| {
                let venue = e.key().clone();
                let connector = e.connector.clone();
                async move {
                    if let Err(err) = connector.disconnect().await {
                        tracing::warn!(%venue, error = %err, "disconnect failed");
                    }
                    venue
                }
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        for venue in results {
            if let Some(entry) = self.entries.get(&venue) {
                entry.healthy.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Pings every connector's `is_connected` and, when reachable, its
    /// reference ticker for a fresh 24h volume reading. A connector that
    /// fails the ping flips to unhealthy and is excluded from aggregation
    /// and `select_for_arbitrage` until the next successful ping (spec
    /// §4.2 lifecycle).
    pub async fn refresh_health(&self) {
        let symbol = Symbol::from(REFERENCE_SYMBOL);
        let tasks: Vec<_> = self
            .entries
            .iter()
            .map(|e| {
                let venue = e.key().clone();
                let connector = e.connector.clone();
                let symbol = symbol.clone();
                async move {
                    let connected = connector.is_connected().await;
                    let volume = if connected {
                        connector.get_ticker(&symbol).await.ok().map(|t| t.volume)
                    } else {
                        None
                    };
                    (venue, connected, volume)
                }
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        for (venue, connected, volume) in results {
            if let Some(entry) = self.entries.get(&venue) {
                entry.healthy.store(connected, Ordering::SeqCst);
                if let Some(volume) = volume {
                    *entry.last_volume_24h.lock() = volume;
                }
            }
        }
    }

    /// Spawns a background task that calls [`refresh_health`] on
    /// `interval`, returning its `JoinHandle` so callers can cancel it on
    /// shutdown.
    ///
    /// [`refresh_health`]: ConnectorRegistry::refresh_health
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.refresh_health().await;
            }
        })
    }

    /// All registered connectors, keyed by venue, regardless of health.
    pub fn connectors(&self) -> std::collections::HashMap<VenueId, Arc<dyn VenueConnector>> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.connector.clone()))
            .collect()
    }

    pub fn get(&self, venue: &VenueId) -> Option<Arc<dyn VenueConnector>> {
        self.entries.get(venue).map(|e| e.connector.clone())
    }

    /// Static fee/trust metadata for a registered venue, used by the
    /// Arbitrage Engine's fee estimate and risk-score venue penalty.
    pub fn profile(&self, venue: &VenueId) -> Option<VenueProfile> {
        self.entries.get(venue).map(|e| e.profile)
    }

    /// Venue ids currently marked healthy.
    pub fn connected(&self) -> Vec<VenueId> {
        self.entries
            .iter()
            .filter(|e| e.healthy.load(Ordering::SeqCst))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Top-`n` healthy venues by composite score (spec §4.2):
    /// `0.4·trust + 0.3·(1/taker_fee) + 0.3·min(vol24h/1e9, 10)`.
    ///
    /// `1/taker_fee` is left unnormalized as the spec defines it; venues
    /// with very low fees dominate this term, which is the intended bias
    /// toward cheap execution.
    pub fn select_for_arbitrage(&self, n: usize) -> Vec<VenueId> {
        let mut scored: Vec<(VenueId, f64)> = self
            .entries
            .iter()
            .filter(|e| e.healthy.load(Ordering::SeqCst))
            .map(|e| {
                let venue = e.key().clone();
                let score = composite_score(&e.profile, *e.last_volume_24h.lock());
                (venue, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored.into_iter().map(|(v, _)| v).collect()
    }

    /// Attempts a real venue connection (spec §4.1 contract). Delegates
    /// straight to the underlying connector, wrapped only so callers hold
    /// the registry handle rather than the connector directly.
    pub async fn connect(&self, venue: &VenueId) -> ArbResult<()> {
        match self.get(venue) {
            Some(connector) => connector.connect().await,
            None => Err(arb_types::ArbError::Invalid(format!(
                "unknown venue: {venue}"
            ))),
        }
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn composite_score(profile: &VenueProfile, volume_24h: Decimal) -> f64 {
    let taker_fee = profile.taker_fee.to_f64().unwrap_or(0.01).max(1e-9);
    let volume_term = (volume_24h / dec!(1_000_000_000))
        .to_f64()
        .unwrap_or(0.0)
        .min(10.0);

    0.4 * profile.trust_score + 0.3 * (1.0 / taker_fee) + 0.3 * volume_term
}

#[cfg(test)]
mod tests {
    use super::*;
    use venue_connector::NoCredentials;

    #[test]
    fn catalog_builds_all_six_venues() {
        let registry = ConnectorRegistry::new();
        registry.create(CATALOG, &NoCredentials);
        assert_eq!(registry.connectors().len(), 6);
    }

    #[test]
    fn unknown_venue_is_skipped_not_panicking() {
        let registry = ConnectorRegistry::new();
        registry.create(&["binance", "not_a_real_venue"], &NoCredentials);
        assert_eq!(registry.connectors().len(), 1);
    }

    #[test]
    fn unhealthy_venues_are_excluded_from_selection() {
        let registry = ConnectorRegistry::new();
        registry.create(CATALOG, &NoCredentials);
        // Nothing has been connected yet, so every entry is unhealthy.
        assert!(registry.select_for_arbitrage(3).is_empty());
        assert!(registry.connected().is_empty());
    }

    #[test]
    fn lower_taker_fee_scores_higher_at_equal_trust_and_volume() {
        let cheap = VenueProfile {
            taker_fee: dec!(0.001),
            trust_score: 0.9,
        };
        let expensive = VenueProfile {
            taker_fee: dec!(0.01),
            trust_score: 0.9,
        };
        assert!(composite_score(&cheap, Decimal::ZERO) > composite_score(&expensive, Decimal::ZERO));
    }

    #[test]
    fn volume_term_is_capped_at_ten() {
        let profile = VenueProfile {
            taker_fee: dec!(0.001),
            trust_score: 0.0,
        };
        let huge_volume = dec!(1_000_000_000_000);
        let score = composite_score(&profile, huge_volume);
        // 0.4*0 + 0.3*(1/0.001) + 0.3*10 = 300 + 3 = 303
        assert!((score - 303.0).abs() < 0.001);
    }
}
