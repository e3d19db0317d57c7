//! Core entities (spec §3): `Ticker`, `OrderBook`, `AggregatedQuote`,
//! `Opportunity`, `Order`, `Execution`, `Position`, `RiskState`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{ClientOrderId, ExecutionId, OpportunityId, Symbol, VenueId, VenueOrderId};

/// A single price observation from one connector or alternative source.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub source: VenueId,
    /// Round-trip latency observed for the poll that produced this ticker,
    /// used by `arbitrage_engine::estimate_exec_seconds` to estimate how
    /// long an execution against this quote would take.
    pub source_latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: Symbol,
    /// Sorted descending by price.
    pub bids: Vec<OrderBookLevel>,
    /// Sorted ascending by price.
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime<Utc>,
    pub source: VenueId,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Total quantity available at or better than `price` on the bid side
    /// (used to estimate tradable size when selling into this book).
    pub fn bid_depth_at_or_above(&self, price: Decimal) -> Decimal {
        self.bids
            .iter()
            .take_while(|l| l.price >= price)
            .map(|l| l.quantity)
            .sum()
    }

    /// Total quantity available at or better than `price` on the ask side
    /// (used to estimate tradable size when buying from this book).
    pub fn ask_depth_at_or_below(&self, price: Decimal) -> Decimal {
        self.asks
            .iter()
            .take_while(|l| l.price <= price)
            .map(|l| l.quantity)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub timestamp: DateTime<Utc>,
    pub source: VenueId,
}

/// A reconciled per-symbol price derived from multiple sources (spec §4.4).
/// Invariant: `bid <= mid <= ask` and `sources_used` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedQuote {
    pub symbol: Symbol,
    pub mid: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread: Decimal,
    pub volume: Decimal,
    pub sources_used: Vec<VenueId>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// True if this snapshot was served from the aggregator cache rather
    /// than a fresh scan (spec §4.4 cache semantics).
    pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses never transition further (spec §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// A live or completed order on one venue. Created on submit, mutated only
/// by the Order Manager after venue feedback (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: ClientOrderId,
    pub venue_id: Option<VenueOrderId>,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub filled_qty: Decimal,
    pub avg_price: Decimal,
    pub status: OrderStatus,
    pub venue: VenueId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The opportunity id this order's client id was derived from.
    pub client_id_seed: OpportunityId,
}

impl Order {
    /// Apply a status transition, enforcing that a terminal order is never
    /// re-opened (spec §3 invariant; spec §8 property 7).
    pub fn apply_status(&mut self, status: OrderStatus, now: DateTime<Utc>) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "order {} is terminal ({:?}); cannot transition to {:?}",
                self.id, self.status, status
            ));
        }
        self.status = status;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Placing,
    Partial,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::RolledBack
        )
    }
}

/// A candidate arbitrage opportunity (spec §3). Produced by the Arbitrage
/// Engine, consumed once by the Execution Engine, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub symbol: Symbol,
    pub buy_venue: VenueId,
    pub sell_venue: VenueId,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub spread: Decimal,
    pub spread_pct: Decimal,
    pub tradable_size: Decimal,
    pub gross_profit: Decimal,
    pub fees: Decimal,
    pub net_profit: Decimal,
    /// In `[0, 1]`.
    pub risk_score: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub est_exec_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// One coordinated buy/sell pair implementing a single arbitrage attempt
/// (spec §3, §4.8). State machine enforced by `execution-engine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub opportunity: Opportunity,
    pub buy_order: Order,
    pub sell_order: Order,
    pub status: ExecutionStatus,
    pub net_profit: Decimal,
    pub fees_paid: Decimal,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Present only once status is `RolledBack`: the order placed to
    /// reverse the leg that filled while its counterpart failed.
    pub rollback_order: Option<Order>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub stop_price: Option<Decimal>,
    pub take_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        let diff = match self.side {
            PositionSide::Long => price - self.entry_price,
            PositionSide::Short => self.entry_price - price,
        };
        self.unrealized_pnl = diff * self.size;
    }
}

/// Process-wide risk accounting (spec §3, §4.6). Mutated only through the
/// Risk Manager's accounting API; readers take a snapshot (`Clone`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    pub open_positions_value: Decimal,
    pub win_rate: f64,
    pub max_drawdown: Decimal,
    pub last_reset: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        Order {
            id: ClientOrderId::for_leg(&OpportunityId::new(), "buy"),
            venue_id: None,
            symbol: Symbol::new("BTC", "USDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            qty: dec!(1),
            price: None,
            stop_price: None,
            filled_qty: dec!(0),
            avg_price: dec!(0),
            status: OrderStatus::Pending,
            venue: VenueId::new("binance"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            client_id_seed: OpportunityId::new(),
        }
    }

    #[test]
    fn terminal_order_rejects_further_transitions() {
        let mut order = sample_order();
        order.apply_status(OrderStatus::Filled, Utc::now()).unwrap();
        assert!(order.apply_status(OrderStatus::Cancelled, Utc::now()).is_err());
    }

    #[test]
    fn position_mark_updates_unrealized_pnl_for_long() {
        let mut pos = Position {
            symbol: Symbol::new("BTC", "USDT"),
            side: PositionSide::Long,
            size: dec!(2),
            entry_price: dec!(100),
            current_price: dec!(100),
            unrealized_pnl: dec!(0),
            realized_pnl: dec!(0),
            stop_price: None,
            take_price: None,
            opened_at: Utc::now(),
            closed_at: None,
        };
        pos.mark(dec!(110));
        assert_eq!(pos.unrealized_pnl, dec!(20));
    }

    #[test]
    fn order_book_depth_sums_levels_within_price_bound() {
        let book = OrderBook {
            symbol: Symbol::new("BTC", "USDT"),
            bids: vec![
                OrderBookLevel { price: dec!(100), quantity: dec!(1) },
                OrderBookLevel { price: dec!(99), quantity: dec!(2) },
            ],
            asks: vec![],
            timestamp: Utc::now(),
            source: VenueId::new("binance"),
        };
        assert_eq!(book.bid_depth_at_or_above(dec!(99)), dec!(3));
        assert_eq!(book.bid_depth_at_or_above(dec!(100)), dec!(1));
    }
}
