//! Shared test doubles for the scenario suite under `tests/` (spec §8).
//!
//! Grounded on `services/aggregator`'s and `services/risk-manager`'s own
//! `#[cfg(test)]` fixtures, lifted into a reusable crate since these
//! scenarios span connector, aggregator, arbitrage-engine, and
//! execution-engine together rather than one module at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use arb_types::{
    ArbError, ArbResult, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus, Position,
    Symbol, Ticker, Trade, VenueId, VenueOrderId,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use venue_connector::{Candle, NewOrder, Timeframe, VenueConnector};

/// How a [`MockConnector`] handles `place_order` for one side.
#[derive(Clone)]
pub enum Fill {
    /// Fills in full at the given price.
    Filled(Decimal),
    /// Rejected outright, as a real venue would refuse a bad order.
    Rejected(String),
    /// Accepted but left open, as a resting limit order would be.
    Pending,
}

/// A scriptable venue: fixed tickers/books/balances, and a per-side fill
/// policy for `place_order`. Every order it places is retained so
/// `get_order_status`/`cancel_order` can answer consistently.
pub struct MockConnector {
    name: String,
    tickers: DashMap<Symbol, Ticker>,
    order_books: DashMap<Symbol, OrderBook>,
    balances: DashMap<String, Decimal>,
    buy_fill: Fill,
    sell_fill: Fill,
    orders: DashMap<VenueOrderId, Order>,
    next_order_id: AtomicU64,
    market_data_delay: Option<std::time::Duration>,
    market_data_calls: AtomicU64,
}

impl MockConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tickers: DashMap::new(),
            order_books: DashMap::new(),
            balances: DashMap::new(),
            buy_fill: Fill::Rejected("no fill configured".into()),
            sell_fill: Fill::Rejected("no fill configured".into()),
            orders: DashMap::new(),
            next_order_id: AtomicU64::new(1),
            market_data_delay: None,
            market_data_calls: AtomicU64::new(0),
        }
    }

    /// How many times `get_market_data` has actually run, to confirm a
    /// scan hit the cache instead of re-fetching.
    pub fn market_data_calls(&self) -> u64 {
        self.market_data_calls.load(Ordering::SeqCst)
    }

    /// Makes `get_market_data` sleep before answering, to simulate a
    /// venue that stalls past the aggregator's per-task deadline.
    pub fn with_market_data_delay(mut self, delay: std::time::Duration) -> Self {
        self.market_data_delay = Some(delay);
        self
    }

    pub fn with_ticker(self, symbol: Symbol, ticker: Ticker) -> Self {
        self.tickers.insert(symbol, ticker);
        self
    }

    pub fn with_order_book(self, symbol: Symbol, book: OrderBook) -> Self {
        self.order_books.insert(symbol, book);
        self
    }

    pub fn with_balance(self, asset: impl Into<String>, amount: Decimal) -> Self {
        self.balances.insert(asset.into(), amount);
        self
    }

    pub fn with_buy_fill(mut self, fill: Fill) -> Self {
        self.buy_fill = fill;
        self
    }

    pub fn with_sell_fill(mut self, fill: Fill) -> Self {
        self.sell_fill = fill;
        self
    }

    /// Snapshot of an order placed through this connector, by client id.
    pub fn order_for_client(&self, client_id: &arb_types::ClientOrderId) -> Option<Order> {
        self.orders.iter().find(|e| &e.value().id == client_id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl VenueConnector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ArbResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> ArbResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn get_market_data(&self, symbols: &[Symbol]) -> ArbResult<HashMap<Symbol, Ticker>> {
        self.market_data_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.market_data_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.tickers.get(s).map(|t| (s.clone(), t.clone())))
            .collect())
    }

    async fn get_ticker(&self, symbol: &Symbol) -> ArbResult<Ticker> {
        self.tickers
            .get(symbol)
            .map(|t| t.clone())
            .ok_or_else(|| ArbError::Invalid(format!("no ticker configured for {symbol}")))
    }

    async fn get_order_book(&self, symbol: &Symbol, _limit: usize) -> ArbResult<OrderBook> {
        self.order_books
            .get(symbol)
            .map(|b| b.clone())
            .ok_or_else(|| ArbError::Invalid(format!("no order book configured for {symbol}")))
    }

    async fn get_trades(&self, _symbol: &Symbol, _limit: usize) -> ArbResult<Vec<Trade>> {
        Ok(Vec::new())
    }

    async fn place_order(&self, order: NewOrder) -> ArbResult<Order> {
        let policy = match order.side {
            OrderSide::Buy => &self.buy_fill,
            OrderSide::Sell => &self.sell_fill,
        };
        match policy {
            Fill::Rejected(reason) => Err(ArbError::Rejected {
                venue: VenueId::new(&self.name),
                reason: reason.clone(),
            }),
            Fill::Pending => {
                let venue_order_id =
                    VenueOrderId::new(format!("{}-{}", self.name, self.next_order_id.fetch_add(1, Ordering::SeqCst)));
                let now = Utc::now();
                let placed = Order {
                    id: order.client_id,
                    venue_id: Some(venue_order_id.clone()),
                    symbol: order.symbol,
                    side: order.side,
                    order_type: order.order_type,
                    qty: order.qty,
                    price: order.price,
                    stop_price: order.stop_price,
                    filled_qty: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    status: OrderStatus::Pending,
                    venue: VenueId::new(&self.name),
                    created_at: now,
                    updated_at: now,
                    client_id_seed: order.client_id_seed,
                };
                self.orders.insert(venue_order_id, placed.clone());
                Ok(placed)
            }
            Fill::Filled(price) => {
                let venue_order_id =
                    VenueOrderId::new(format!("{}-{}", self.name, self.next_order_id.fetch_add(1, Ordering::SeqCst)));
                let now = Utc::now();
                let placed = Order {
                    id: order.client_id,
                    venue_id: Some(venue_order_id.clone()),
                    symbol: order.symbol,
                    side: order.side,
                    order_type: order.order_type,
                    qty: order.qty,
                    price: order.price,
                    stop_price: order.stop_price,
                    filled_qty: order.qty,
                    avg_price: *price,
                    status: OrderStatus::Filled,
                    venue: VenueId::new(&self.name),
                    created_at: now,
                    updated_at: now,
                    client_id_seed: order.client_id_seed,
                };
                self.orders.insert(venue_order_id, placed.clone());
                Ok(placed)
            }
        }
    }

    async fn cancel_order(&self, venue_order_id: &VenueOrderId) -> ArbResult<()> {
        if let Some(mut entry) = self.orders.get_mut(venue_order_id) {
            let _ = entry.apply_status(OrderStatus::Cancelled, Utc::now());
        }
        Ok(())
    }

    async fn get_order_status(&self, venue_order_id: &VenueOrderId) -> ArbResult<Order> {
        self.orders
            .get(venue_order_id)
            .map(|e| e.clone())
            .ok_or_else(|| ArbError::Invalid(format!("unknown venue order id {venue_order_id}")))
    }

    async fn get_positions(&self) -> ArbResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> ArbResult<HashMap<String, Decimal>> {
        Ok(self.balances.iter().map(|e| (e.key().clone(), *e.value())).collect())
    }

    async fn get_historical_data(
        &self,
        _symbol: &Symbol,
        _timeframe: Timeframe,
        _from: chrono::DateTime<Utc>,
        _to: chrono::DateTime<Utc>,
    ) -> ArbResult<Vec<Candle>> {
        Ok(Vec::new())
    }
}

pub fn ticker(symbol: &Symbol, venue: &str, last: Decimal, bid: Decimal, ask: Decimal) -> Ticker {
    Ticker {
        symbol: symbol.clone(),
        last,
        bid,
        ask,
        volume: Decimal::from(1000),
        timestamp: Utc::now(),
        source: VenueId::new(venue),
        source_latency_ms: 10,
    }
}

pub fn one_level_book(symbol: &Symbol, venue: &str, bid: Decimal, ask: Decimal, depth: Decimal) -> OrderBook {
    OrderBook {
        symbol: symbol.clone(),
        bids: vec![OrderBookLevel {
            price: bid,
            quantity: depth,
        }],
        asks: vec![OrderBookLevel {
            price: ask,
            quantity: depth,
        }],
        timestamp: Utc::now(),
        source: VenueId::new(venue),
    }
}

/// Attaches a fresh consumer group to `stream` and waits (up to
/// `timeout`) for at least `expected` messages, returning whatever
/// arrived. There is no public way to peek a stream without a consumer
/// group (spec §4.9's bus is group-addressed, not randomly readable), so
/// every scenario test that inspects a published payload goes through
/// this.
pub async fn drain_stream(
    bus: &event_bus::EventBus,
    stream: &str,
    group: &str,
    expected: usize,
    timeout: std::time::Duration,
) -> Vec<serde_json::Value> {
    let collected = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = collected.clone();
    let handle = bus.spawn_consumer(stream, group, "test-consumer", std::time::Duration::from_millis(10), 16, move |msg| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(msg.payload);
            Ok(())
        }
    });

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if collected.lock().unwrap().len() >= expected || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    handle.stop();
    let out = collected.lock().unwrap().clone();
    out
}
