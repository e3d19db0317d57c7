//! Canonical stream names (spec §4.9). Every publisher/consumer in this
//! workspace refers to a stream by one of these constants rather than a
//! literal string, so a typo in a stream name is a compile error.

pub const MARKET_DATA_TICKS: &str = "market_data.ticks";
pub const INDICATORS_COMPUTED: &str = "indicators.computed";
pub const SIGNALS_GENERATED: &str = "signals.generated";
pub const ALERTS_GENERAL: &str = "alerts.general";
pub const ALERTS_MARKET_ABUSE: &str = "alerts.market_abuse";
pub const ARBITRAGE_OPPORTUNITIES: &str = "arbitrage.opportunities";
pub const ARBITRAGE_EXECUTIONS: &str = "arbitrage.executions";
pub const ORDERS_SUBMITTED: &str = "orders.submitted";
pub const ORDERS_UPDATED: &str = "orders.updated";
pub const ORDERS_EXECUTED: &str = "orders.executed";
pub const ORDERS_CANCELLED: &str = "orders.cancelled";
pub const POSITIONS_OPENED: &str = "positions.opened";
pub const POSITIONS_CLOSED: &str = "positions.closed";
pub const BACKTESTING_EQUITY: &str = "backtesting.equity";
pub const BACKTESTING_RESULTS: &str = "backtesting.results";
pub const API_REQUESTS: &str = "api.requests";
pub const API_ERRORS: &str = "api.errors";
