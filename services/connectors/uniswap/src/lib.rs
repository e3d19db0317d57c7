//! Uniswap V2 synthetic-order-book connector (spec §4.1).
//!
//! Pulls pool reserves from a subgraph endpoint and derives a synthetic
//! order book from the constant-product curve instead of a native order
//! book, since V2 pools have none. The curve math is grounded on
//! `libs/amm/src/v2_math.rs`'s `V2Math::calculate_output_amount`,
//! reused here unchanged rather than reimplemented, since decimal-exact
//! constant-product math has exactly one correct form.
//!
//! DEX pools have no account/order-placement REST surface comparable to a
//! CEX; `place_order`/`cancel_order`/`get_order_status` return
//! `ArbError::Invalid` rather than attempting on-chain execution, which is
//! out of scope for this connector (spec's Non-goals: "Smart order
//! routing/slicing, DEX transaction execution").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arb_types::{
    ArbError, ArbResult, Order, OrderBook, OrderBookLevel, Position, Symbol, Ticker, Trade,
    VenueId, VenueOrderId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use venue_connector::{Candle, CredentialsProvider, NewOrder, RateLimiter, RetryPolicy, Timeframe, VenueConnector};

const SUBGRAPH_URL: &str = "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v2";
const VENUE: &str = "uniswap_v2";
const DEFAULT_FEE_BPS: u32 = 30;

fn venue_id() -> VenueId {
    VenueId::new(VENUE)
}

/// Constant-product math, grounded on `V2Math::calculate_output_amount`.
fn output_amount(amount_in: Decimal, reserve_in: Decimal, reserve_out: Decimal, fee_bps: u32) -> Option<Decimal> {
    if amount_in <= Decimal::ZERO || reserve_in <= Decimal::ZERO || reserve_out <= Decimal::ZERO {
        return None;
    }
    let fee_multiplier = Decimal::from(10_000 - fee_bps) / dec!(10000);
    let amount_in_after_fee = amount_in * fee_multiplier;
    let numerator = amount_in_after_fee * reserve_out;
    let denominator = reserve_in + amount_in_after_fee;
    if denominator <= Decimal::ZERO {
        return None;
    }
    Some(numerator / denominator)
}

/// Maps a canonical `Symbol` to the on-chain pair this connector tracks.
/// In practice populated from a pool registry config; hardcoded to the
/// handful of pairs this platform watches by default.
#[derive(Debug, Clone)]
struct PoolConfig {
    pair_address: String,
    fee_bps: u32,
}

fn default_pools() -> HashMap<Symbol, PoolConfig> {
    let mut pools = HashMap::new();
    pools.insert(
        Symbol::new("WETH", "USDC"),
        PoolConfig {
            pair_address: "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc".to_string(),
            fee_bps: DEFAULT_FEE_BPS,
        },
    );
    pools.insert(
        Symbol::new("WBTC", "WETH"),
        PoolConfig {
            pair_address: "0xbb2b8038a1640196fbe3e38816f3e67cba72d940".to_string(),
            fee_bps: DEFAULT_FEE_BPS,
        },
    );
    pools
}

pub struct UniswapConnector {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    pools: HashMap<Symbol, PoolConfig>,
    connected: AtomicBool,
}

impl UniswapConnector {
    pub fn new(_credentials_provider: &dyn CredentialsProvider) -> Self {
        let mut rate_limiter = RateLimiter::new();
        rate_limiter.configure_venue(venue_id(), 300);

        Self {
            http: reqwest::Client::new(),
            rate_limiter,
            retry_policy: RetryPolicy::default(),
            pools: default_pools(),
            connected: AtomicBool::new(false),
        }
    }

    fn pool_for(&self, symbol: &Symbol) -> ArbResult<&PoolConfig> {
        self.pools.get(symbol).ok_or_else(|| ArbError::Invalid(format!("no tracked pool for {symbol}")))
    }

    async fn fetch_reserves(&self, pool: &PoolConfig) -> ArbResult<(Decimal, Decimal)> {
        self.rate_limiter.wait(&venue_id()).await;
        let venue = venue_id();
        let query = serde_json::json!({
            "query": format!(
                "{{ pair(id: \"{}\") {{ reserve0 reserve1 }} }}",
                pool.pair_address
            )
        });

        #[derive(Deserialize)]
        struct GraphPair {
            reserve0: String,
            reserve1: String,
        }
        #[derive(Deserialize)]
        struct GraphData {
            pair: Option<GraphPair>,
        }
        #[derive(Deserialize)]
        struct GraphResponse {
            data: Option<GraphData>,
        }

        let response: GraphResponse = venue_connector::retry(&self.retry_policy, &venue, "fetch_reserves", || {
            let http = self.http.clone();
            let query = query.clone();
            let venue = venue.clone();
            async move {
                let resp = http
                    .post(SUBGRAPH_URL)
                    .json(&query)
                    .send()
                    .await
                    .map_err(|e| venue_connector::map_reqwest_err(&venue, "fetch_reserves", e))?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(venue_connector::map_status_err(&venue, status, &body));
                }
                resp.json::<GraphResponse>()
                    .await
                    .map_err(|e| venue_connector::map_reqwest_err(&venue, "fetch_reserves", e))
            }
        })
        .await?;

        let pair = response
            .data
            .and_then(|d| d.pair)
            .ok_or_else(|| ArbError::Unavailable { venue: venue_id(), reason: "pool not found in subgraph".into() })?;

        let reserve0: Decimal = pair.reserve0.parse().map_err(|_| ArbError::Invalid("bad reserve0".into()))?;
        let reserve1: Decimal = pair.reserve1.parse().map_err(|_| ArbError::Invalid("bad reserve1".into()))?;
        Ok((reserve0, reserve1))
    }

    /// Synthesize order book levels at a handful of standard trade sizes,
    /// since a constant-product pool has no discrete levels of its own.
    fn synthesize_levels(reserve_base: Decimal, reserve_quote: Decimal, fee_bps: u32) -> (Vec<OrderBookLevel>, Vec<OrderBookLevel>) {
        let mid = reserve_quote / reserve_base;
        let sizes = [dec!(0.1), dec!(0.5), dec!(1), dec!(5), dec!(10)];

        let mut asks = Vec::new();
        for size_pct in sizes {
            let amount_in = reserve_base * size_pct / dec!(100);
            if let Some(quote_out) = output_amount(amount_in, reserve_base, reserve_quote, fee_bps) {
                let effective_price = quote_out / amount_in;
                asks.push(OrderBookLevel { price: effective_price, quantity: amount_in });
            }
        }

        let mut bids = Vec::new();
        for size_pct in sizes {
            let amount_in = reserve_quote * size_pct / dec!(100);
            if let Some(base_out) = output_amount(amount_in, reserve_quote, reserve_base, fee_bps) {
                if base_out > Decimal::ZERO {
                    let effective_price = amount_in / base_out;
                    bids.push(OrderBookLevel { price: effective_price, quantity: base_out });
                }
            }
        }

        asks.sort_by(|a, b| a.price.cmp(&b.price));
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        let _ = mid;
        (bids, asks)
    }
}

#[async_trait]
impl VenueConnector for UniswapConnector {
    fn name(&self) -> &str {
        VENUE
    }

    async fn connect(&self) -> ArbResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ArbResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> ArbResult<HashMap<Symbol, Ticker>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_ticker(symbol).await {
                Ok(ticker) => {
                    out.insert(symbol.clone(), ticker);
                }
                Err(e) => tracing::warn!(venue = VENUE, %symbol, error = %e, "skipping symbol for this poll"),
            }
        }
        Ok(out)
    }

    async fn get_ticker(&self, symbol: &Symbol) -> ArbResult<Ticker> {
        let pool = self.pool_for(symbol)?.clone();
        let started = Instant::now();
        let (reserve0, reserve1) = self.fetch_reserves(&pool).await?;
        let mid = reserve1 / reserve0;
        let (bids, asks) = Self::synthesize_levels(reserve0, reserve1, pool.fee_bps);

        Ok(Ticker {
            symbol: symbol.clone(),
            last: mid,
            bid: bids.first().map(|l| l.price).unwrap_or(mid),
            ask: asks.first().map(|l| l.price).unwrap_or(mid),
            volume: reserve0,
            timestamp: Utc::now(),
            source: venue_id(),
            source_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook> {
        let pool = self.pool_for(symbol)?.clone();
        let (reserve0, reserve1) = self.fetch_reserves(&pool).await?;
        let (mut bids, mut asks) = Self::synthesize_levels(reserve0, reserve1, pool.fee_bps);
        bids.truncate(limit.max(1));
        asks.truncate(limit.max(1));

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids,
            asks,
            timestamp: Utc::now(),
            source: venue_id(),
        })
    }

    async fn get_trades(&self, _symbol: &Symbol, _limit: usize) -> ArbResult<Vec<Trade>> {
        // Swap-level history would need a separate subgraph query against
        // the `swaps` entity; not needed for the aggregator's quote path.
        Ok(Vec::new())
    }

    async fn place_order(&self, _order: NewOrder) -> ArbResult<Order> {
        Err(ArbError::Invalid(
            "uniswap_v2: on-chain order execution is not supported by this connector".into(),
        ))
    }

    async fn cancel_order(&self, _venue_order_id: &VenueOrderId) -> ArbResult<()> {
        Err(ArbError::Invalid(
            "uniswap_v2: there is no cancellable order state for an AMM swap".into(),
        ))
    }

    async fn get_order_status(&self, venue_order_id: &VenueOrderId) -> ArbResult<Order> {
        Err(ArbError::Invalid(format!(
            "uniswap_v2: no order state tracked for {venue_order_id}"
        )))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        Ok(HashMap::new())
    }

    async fn get_historical_data(
        &self,
        _symbol: &Symbol,
        _timeframe: Timeframe,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        Err(ArbError::Invalid(
            "uniswap_v2: historical candles require a separate price-history subgraph, not implemented".into(),
        ))
    }
}

pub fn connector(credentials_provider: &dyn CredentialsProvider) -> Arc<dyn VenueConnector> {
    Arc::new(UniswapConnector::new(credentials_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_amount_applies_thirty_bps_fee() {
        let out = output_amount(dec!(1), dec!(100), dec!(100), 30).unwrap();
        assert!(out < dec!(1));
        assert!(out > dec!(0.98));
    }

    #[test]
    fn synthesized_asks_are_priced_above_synthesized_bids() {
        let (bids, asks) = UniswapConnector::synthesize_levels(dec!(1000), dec!(2_000_000), 30);
        assert!(!bids.is_empty());
        assert!(!asks.is_empty());
        assert!(asks[0].price >= bids[0].price);
    }

    #[test]
    fn unknown_symbol_has_no_tracked_pool() {
        let connector = UniswapConnector::new(&venue_connector::NoCredentials);
        assert!(connector.pool_for(&Symbol::new("DOGE", "USDT")).is_err());
    }
}
