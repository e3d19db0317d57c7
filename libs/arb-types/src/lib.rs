//! # Arbitrage Platform — Shared Types
//!
//! Unified domain model for the multi-venue arbitrage platform: canonical
//! symbols and venue identifiers, market data value types (`Ticker`,
//! `OrderBook`, `AggregatedQuote`), trading types (`Order`, `Execution`,
//! `Position`), risk accounting (`RiskState`), and the stable error taxonomy
//! every component maps its failures onto.
//!
//! ## Design Philosophy
//!
//! - **No float money**: every price/size/pnl field is `rust_decimal::Decimal`.
//!   Floats are only used for derived scores (`confidence`, `riskScore`) that
//!   are explicitly defined to live in `[0, 1]`.
//! - **Canonical symbols**: all venues speak `BASE/QUOTE` (`Symbol`) to the
//!   rest of the system; venue-specific encoding is each connector's problem.
//! - **Identifiers by value, not by reference**: executions reference orders
//!   and opportunities by id (`Uuid`/`String`), never by object handle, so
//!   there is no object-graph cycle between the Execution Engine, Order
//!   Manager, and Arbitrage Engine.

pub mod error;
pub mod ids;
pub mod model;

pub use error::{ArbError, ArbResult};
pub use ids::{ClientOrderId, ExecutionId, OpportunityId, Symbol, VenueId, VenueOrderId};
pub use model::{
    AggregatedQuote, Execution, ExecutionStatus, Order, OrderBook, OrderBookLevel, OrderSide,
    OrderStatus, OrderType, Opportunity, Position, PositionSide, RiskState, Ticker, Trade,
};
