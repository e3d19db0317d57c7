//! # Arbitrage Engine
//!
//! Scans the Data Aggregator at a configurable cadence, turns each
//! cross-venue spread candidate into a costed `Opportunity`, and forwards
//! the ones Risk Manager clears to the `arbitrage.opportunities` stream
//! (spec §4.5).
//!
//! Grounded on `services/strategies/flash_arbitrage/src/detector.rs`'s
//! opportunity construction and profitability guard, generalized from its
//! single-venue-pair detector into this platform's N-venue scan; the
//! scan loop's exponential backoff on repeated failure is grounded on
//! `venue_connector::retry::RetryPolicy::delay_for_attempt` rather than
//! `strategy_engine.rs` (whose `run()` just delegates to a relay consumer
//! and has no comparable cadence logic of its own).

use std::sync::Arc;
use std::time::Duration;

use aggregator::{DataAggregator, SpreadCandidate};
use arb_types::{
    ArbError, ArbResult, Opportunity, OpportunityId, Symbol, Ticker, VenueId,
};
use chrono::Utc;
use config::ArbConfig;
use connector_registry::ConnectorRegistry;
use event_bus::{EventBus, streams};
use risk_manager::{RiskManager, RiskScoreWeights, risk_score};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};
use venue_connector::VenueConnector;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const FAILURES_BEFORE_BACKOFF: u32 = 3;

/// External view of currently-open positions, supplied by the Position
/// Manager. Kept as a seam (like `CredentialsProvider`) so the engine
/// doesn't own position state itself.
pub trait OpenPositionsView: Send + Sync {
    fn open_symbols(&self) -> Vec<Symbol>;
    fn open_position_count(&self) -> u32;
}

/// Default view for a standalone engine, or before the Position Manager
/// has reported anything: no open positions, so `sameSymbolCorrelation`
/// and `maxOpenPositions` never block on startup.
pub struct NoOpenPositions;

impl OpenPositionsView for NoOpenPositions {
    fn open_symbols(&self) -> Vec<Symbol> {
        Vec::new()
    }

    fn open_position_count(&self) -> u32 {
        0
    }
}

/// Scans for cross-venue spreads and forwards risk-cleared opportunities
/// (spec §4.5).
pub struct ArbitrageEngine {
    aggregator: Arc<DataAggregator>,
    registry: Arc<ConnectorRegistry>,
    risk_manager: Arc<RiskManager>,
    event_bus: EventBus,
    positions: Arc<dyn OpenPositionsView>,
    watchlist: Vec<Symbol>,
    min_spread_pct: Decimal,
    min_profit: Decimal,
    max_opportunity_size: Decimal,
    slippage_bps: Decimal,
    scan_interval: Duration,
    risk_weights: RiskScoreWeights,
}

impl ArbitrageEngine {
    pub fn new(
        aggregator: Arc<DataAggregator>,
        registry: Arc<ConnectorRegistry>,
        risk_manager: Arc<RiskManager>,
        event_bus: EventBus,
        positions: Arc<dyn OpenPositionsView>,
        config: &ArbConfig,
    ) -> Self {
        let watchlist = config.watchlist.iter().map(|s| Symbol::from(s.as_str())).collect();
        Self {
            aggregator,
            registry,
            risk_manager,
            event_bus,
            positions,
            watchlist,
            min_spread_pct: config.min_spread_pct,
            min_profit: config.min_profit,
            max_opportunity_size: config.max_opportunity_size,
            slippage_bps: config.slippage_bps,
            scan_interval: Duration::from_secs(config.scan_interval_seconds),
            risk_weights: RiskScoreWeights::default(),
        }
    }

    /// Runs the scan loop until `shutdown` resolves. Backs off
    /// exponentially (doubling, capped at 30s) after three consecutive
    /// scan failures, resetting to the configured cadence on the next
    /// success — the same shape as `RetryPolicy::delay_for_attempt`,
    /// applied to cycles instead of single I/O calls.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut interval = self.scan_interval;
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    info!("arbitrage engine shutting down");
                    return;
                }
            }

            match self.run_cycle().await {
                Ok(accepted) => {
                    if consecutive_failures > 0 {
                        info!("scan recovered after {} failures", consecutive_failures);
                    }
                    consecutive_failures = 0;
                    interval = self.scan_interval;
                    debug!(accepted, "scan cycle completed");
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(error = %err, consecutive_failures, "scan cycle failed");
                    if consecutive_failures >= FAILURES_BEFORE_BACKOFF {
                        interval = (interval * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
    }

    /// One scan-detect-score-gate-publish pass over the watchlist.
    /// Returns the number of opportunities published, or an error if the
    /// cycle could not run at all (e.g. no connected venues).
    pub async fn run_cycle(&self) -> ArbResult<usize> {
        if self.registry.connected().is_empty() {
            return Err(ArbError::Unavailable {
                venue: VenueId::new("all"),
                reason: "no connected venues".into(),
            });
        }

        let candidates = self
            .aggregator
            .opportunities(&self.watchlist, self.min_spread_pct)
            .await;

        let mut accepted = 0;
        for candidate in candidates {
            let Some(opp) = self.build_opportunity(&candidate).await else {
                continue;
            };
            if opp.net_profit <= self.min_profit {
                debug!(symbol = %opp.symbol, net_profit = %opp.net_profit, "opportunity below minProfit, discarded");
                continue;
            }

            let open_symbols = self.positions.open_symbols();
            let open_count = self.positions.open_position_count();
            match self
                .risk_manager
                .is_opportunity_safe(&opp, &open_symbols, open_count)
            {
                Ok(()) => {
                    self.publish(&opp)?;
                    accepted += 1;
                }
                Err(violation) => {
                    debug!(symbol = %opp.symbol, %violation, "opportunity risk-blocked");
                }
            }
        }

        Ok(accepted)
    }

    /// Sizes, costs, and scores one spread candidate (spec §4.5 steps
    /// 2-5). Returns `None` when a connector is missing from the
    /// registry or balances can't be read — the candidate is simply
    /// dropped, not retried, since a fresh one arrives next cycle.
    async fn build_opportunity(&self, candidate: &SpreadCandidate) -> Option<Opportunity> {
        let buy_connector = self.registry.get(&candidate.min_venue)?;
        let sell_connector = self.registry.get(&candidate.max_venue)?;
        let buy_profile = self.registry.profile(&candidate.min_venue)?;
        let sell_profile = self.registry.profile(&candidate.max_venue)?;

        let buy_ticker = buy_connector.get_ticker(&candidate.symbol).await.ok()?;
        let sell_ticker = sell_connector.get_ticker(&candidate.symbol).await.ok()?;
        let buy_price = buy_ticker.ask;
        let sell_price = sell_ticker.bid;
        if sell_price <= buy_price {
            return None;
        }

        let size = self
            .estimate_tradable_size(&buy_connector, &sell_connector, &candidate.symbol, buy_price)
            .await;
        if size <= Decimal::ZERO {
            return None;
        }

        let notional = size * buy_price;
        let fees = buy_profile.taker_fee * notional + sell_profile.taker_fee * notional;
        let slippage = (self.slippage_bps / dec!(10_000)) * notional * dec!(2);

        let spread = sell_price - buy_price;
        let spread_pct = spread / buy_price;
        let gross_profit = spread * size;
        let net_profit = gross_profit - fees - slippage;

        let confidence = candidate.confidence;
        let liquidity_coverage = self
            .liquidity_coverage(&buy_connector, &sell_connector, &candidate.symbol, size, buy_price, sell_price)
            .await;
        let volatility = 1.0 - confidence;
        let venue_risk_penalty = 1.0 - (buy_profile.trust_score + sell_profile.trust_score) / 2.0;
        let risk = risk_score(volatility, liquidity_coverage, venue_risk_penalty, self.risk_weights);

        Some(Opportunity {
            id: OpportunityId::new(),
            symbol: candidate.symbol.clone(),
            buy_venue: candidate.min_venue.clone(),
            sell_venue: candidate.max_venue.clone(),
            buy_price,
            sell_price,
            spread,
            spread_pct,
            tradable_size: size,
            gross_profit,
            fees: fees + slippage,
            net_profit,
            risk_score: risk,
            confidence,
            est_exec_seconds: estimate_exec_seconds(&buy_ticker, &sell_ticker),
            timestamp: Utc::now(),
        })
    }

    /// `min(availableBase on sellVenue, availableQuote/buyPx on buyVenue)`
    /// (spec §4.5 step 2), capped by the configured per-opportunity size
    /// ceiling. Connectors without tradable balances (public, read-only
    /// connectors; credential-less sources) report empty balances, which
    /// correctly sizes the opportunity to zero rather than erroring.
    async fn estimate_tradable_size(
        &self,
        buy_connector: &Arc<dyn VenueConnector>,
        sell_connector: &Arc<dyn VenueConnector>,
        symbol: &Symbol,
        buy_price: Decimal,
    ) -> Decimal {
        let sell_balances = sell_connector.get_balances().await.unwrap_or_default();
        let buy_balances = buy_connector.get_balances().await.unwrap_or_default();

        let available_base = sell_balances
            .get(symbol.base())
            .copied()
            .unwrap_or(Decimal::ZERO);
        let available_quote = buy_balances
            .get(symbol.quote())
            .copied()
            .unwrap_or(Decimal::ZERO);

        if buy_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let size = available_base.min(available_quote / buy_price);
        size.min(self.max_opportunity_size).max(Decimal::ZERO)
    }

    /// How well order book depth on both legs covers the sized trade, in
    /// `[0, 1]`. Read failures (no book available) are treated as zero
    /// coverage rather than an error, pushing the opportunity's risk
    /// score up instead of discarding it outright.
    async fn liquidity_coverage(
        &self,
        buy_connector: &Arc<dyn VenueConnector>,
        sell_connector: &Arc<dyn VenueConnector>,
        symbol: &Symbol,
        size: Decimal,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> f64 {
        if size <= Decimal::ZERO {
            return 0.0;
        }
        let buy_depth = buy_connector
            .get_order_book(symbol, 50)
            .await
            .map(|book| book.ask_depth_at_or_below(buy_price))
            .unwrap_or(Decimal::ZERO);
        let sell_depth = sell_connector
            .get_order_book(symbol, 50)
            .await
            .map(|book| book.bid_depth_at_or_above(sell_price))
            .unwrap_or(Decimal::ZERO);

        let covered = buy_depth.min(sell_depth);
        (covered / size).to_f64().unwrap_or(0.0).clamp(0.0, 1.0)
    }

    fn publish(&self, opp: &Opportunity) -> ArbResult<()> {
        self.event_bus.publish(
            streams::ARBITRAGE_OPPORTUNITIES,
            serde_json::json!({
                "id": opp.id.as_str(),
                "symbol": opp.symbol.as_str(),
                "buy_venue": opp.buy_venue.as_str(),
                "sell_venue": opp.sell_venue.as_str(),
                "buy_price": opp.buy_price,
                "sell_price": opp.sell_price,
                "spread": opp.spread,
                "spread_pct": opp.spread_pct,
                "tradable_size": opp.tradable_size,
                "gross_profit": opp.gross_profit,
                "fees": opp.fees,
                "net_profit": opp.net_profit,
                "risk_score": opp.risk_score,
                "confidence": opp.confidence,
                "est_exec_seconds": opp.est_exec_seconds,
                "timestamp": opp.timestamp.to_rfc3339(),
            }),
        )?;
        Ok(())
    }
}

/// Rough execution-time estimate from both legs' last-observed source
/// latency, plus a fixed base for order placement/confirmation.
fn estimate_exec_seconds(buy_ticker: &Ticker, sell_ticker: &Ticker) -> f64 {
    let latency_seconds =
        (buy_ticker.source_latency_ms + sell_ticker.source_latency_ms) as f64 / 1000.0;
    1.0 + latency_seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn size_is_capped_at_configured_ceiling() {
        let available_base = dec!(100);
        let available_quote_over_price = dec!(50);
        let ceiling = dec!(10);
        let size = available_base.min(available_quote_over_price).min(ceiling);
        assert_eq!(size, dec!(10));
    }

    #[test]
    fn negative_spread_candidate_is_rejected() {
        let buy_price = dec!(100);
        let sell_price = dec!(99);
        assert!(sell_price <= buy_price);
    }

    #[test]
    fn liquidity_coverage_clamps_to_one() {
        let covered = dec!(500);
        let size = dec!(100);
        let coverage = (covered / size).to_f64().unwrap_or(0.0).clamp(0.0, 1.0);
        assert_eq!(coverage, 1.0);
    }

    #[test]
    fn zero_size_yields_zero_liquidity_coverage() {
        let size = dec!(0);
        let coverage = if size <= Decimal::ZERO {
            0.0
        } else {
            1.0
        };
        assert_eq!(coverage, 0.0);
    }

    #[test]
    fn exec_seconds_estimate_grows_with_latency() {
        let base = Ticker {
            symbol: Symbol::new("BTC", "USDT"),
            last: dec!(1),
            bid: dec!(1),
            ask: dec!(1),
            volume: dec!(1),
            timestamp: Utc::now(),
            source: VenueId::new("binance"),
            source_latency_ms: 0,
        };
        let mut slow = base.clone();
        slow.source_latency_ms = 2000;
        assert!(estimate_exec_seconds(&slow, &base) > estimate_exec_seconds(&base, &base));
    }
}
