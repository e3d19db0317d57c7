//! # Venue Connector
//!
//! Uniform, polymorphic adapter surface over one exchange or DEX (spec
//! §4.1). All variants — spot, futures, margin, DEX subgraph — satisfy the
//! same capability set so the Data Aggregator and Connector Registry never
//! special-case a venue.
//!
//! Grounded on `services/adapters/src/lib.rs`'s adapter-trait discipline and
//! `services/adapters/src/input/collectors/{binance,coinbase,kraken,
//! gemini}.rs`; generalized from the teacher's stateless WebSocket-to-TLV
//! transformers into a polling `dyn`-safe trait matching the Data
//! Aggregator's fan-out model.

pub mod http;
pub mod rate_limit;
pub mod retry;

use std::collections::HashMap;

use arb_types::{
    ArbResult, Order, OrderBook, Position, Symbol, Ticker, Trade, VenueId, VenueOrderId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use rate_limit::RateLimiter;
pub use retry::{RetryPolicy, retry};
pub use http::{map_reqwest_err, map_status_err};

/// A new order request handed to `VenueConnector::place_order`.
///
/// `place_order` is **not idempotent** at the venue (spec §4.1): the caller
/// assigns `client_id` up front and the adapter surfaces the venue-assigned
/// id on the returned `Order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub client_id: arb_types::ClientOrderId,
    pub symbol: Symbol,
    pub side: arb_types::OrderSide,
    pub order_type: arb_types::OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub client_id_seed: arb_types::OpportunityId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    OneMinute,
    FiveMinutes,
    OneHour,
    OneDay,
}

/// Uniform capability set every venue connector implements (spec §4.1).
///
/// Every method's concrete implementation is expected to route its I/O
/// through [`retry::retry`] so transient failures are retried and surfaced
/// uniformly as `ArbError::Timeout`/`ArbError::Unavailable`, never as a raw
/// panic or an un-typed error.
#[async_trait]
pub trait VenueConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> ArbResult<()>;
    async fn disconnect(&self) -> ArbResult<()>;
    async fn is_connected(&self) -> bool;

    async fn get_market_data(&self, symbols: &[Symbol]) -> ArbResult<HashMap<Symbol, Ticker>>;
    async fn get_ticker(&self, symbol: &Symbol) -> ArbResult<Ticker>;
    async fn get_order_book(&self, symbol: &Symbol, limit: usize) -> ArbResult<OrderBook>;
    async fn get_trades(&self, symbol: &Symbol, limit: usize) -> ArbResult<Vec<Trade>>;

    async fn place_order(&self, order: NewOrder) -> ArbResult<Order>;
    async fn cancel_order(&self, venue_order_id: &VenueOrderId) -> ArbResult<()>;
    async fn get_order_status(&self, venue_order_id: &VenueOrderId) -> ArbResult<Order>;

    async fn get_positions(&self) -> ArbResult<Vec<Position>>;
    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>>;

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>>;
}

/// Static metadata used by `ConnectorRegistry::select_for_arbitrage`'s
/// composite scoring (spec §4.2): `0.4*trust + 0.3*(1/taker_fee) +
/// 0.3*min(vol24h/1e9, 10)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VenueProfile {
    pub taker_fee: Decimal,
    pub trust_score: f64,
}

/// A single venue/source's credentials. `passphrase` is only present for
/// venues that require one (e.g. Coinbase).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
    pub passphrase: Option<String>,
}

/// External collaborator (spec §6): supplies credentials by venue without
/// ever letting them flow through logs. Implementations typically read
/// from environment variables or a secrets manager; this crate only
/// defines the seam.
pub trait CredentialsProvider: Send + Sync {
    fn get(&self, venue: &VenueId) -> Option<Credentials>;
}

/// `CredentialsProvider` for venues that need no authentication (public
/// market-data-only connectors, alternative sources).
pub struct NoCredentials;

impl CredentialsProvider for NoCredentials {
    fn get(&self, _venue: &VenueId) -> Option<Credentials> {
        None
    }
}
