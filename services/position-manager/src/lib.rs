//! # Position Manager
//!
//! Consumes completed executions and live price marks, and produces
//! position events (spec §3: "a position manager sizes and tracks
//! positions, treated here as consumers of execution events and
//! producers of position events").
//!
//! A matched-pair arbitrage execution that fills both legs is flat by
//! construction: there is no residual symbol exposure to track. Exposure
//! only survives a [`RolledBack`](arb_types::ExecutionStatus::RolledBack)
//! execution, where one leg filled and the reversing order covers it
//! only up to whatever quantity it itself managed to fill. This module
//! opens a position for that residual, marks it against live prices, and
//! closes it on a stop/take hit or an explicit exit.
//!
//! Grounded on `services/risk-manager`'s accounting table shape (a single
//! concurrent map keyed by the thing being tracked, mutated in place) and
//! on `order_manager.rs`'s event-bus publish-on-state-change pattern.

use arb_types::{ArbResult, Execution, ExecutionStatus, Order, OrderSide, Position, PositionSide, Symbol};
use arbitrage_engine::OpenPositionsView;
use chrono::Utc;
use dashmap::DashMap;
use event_bus::{EventBus, streams};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Tracks at most one open position per symbol, opened from execution
/// fallout and closed by price-level exit or explicit request.
pub struct PositionManager {
    positions: DashMap<Symbol, Position>,
    event_bus: EventBus,
}

impl PositionManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            positions: DashMap::new(),
            event_bus,
        }
    }

    /// Folds one completed execution into the position table. Only a
    /// rolled-back execution can leave residual exposure; a fully
    /// completed or failed execution touches no position.
    pub fn record_execution(&self, execution: &Execution) -> ArbResult<()> {
        if execution.status != ExecutionStatus::RolledBack {
            return Ok(());
        }
        let Some((filled, residual_qty)) = residual_exposure(execution) else {
            return Ok(());
        };
        if residual_qty <= Decimal::ZERO {
            return Ok(());
        }

        let side = match filled.side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };
        let position = Position {
            symbol: execution.opportunity.symbol.clone(),
            side,
            size: residual_qty,
            entry_price: filled.avg_price,
            current_price: filled.avg_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            stop_price: None,
            take_price: None,
            opened_at: Utc::now(),
            closed_at: None,
        };
        info!(symbol = %position.symbol, size = %position.size, "position opened from rollback residual");
        self.positions.insert(position.symbol.clone(), position.clone());
        self.publish(streams::POSITIONS_OPENED, &position)
    }

    /// Marks a symbol's open position (if any) to the given price.
    pub fn mark_price(&self, symbol: &Symbol, price: Decimal) {
        if let Some(mut position) = self.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    /// Closes every position whose current price has crossed its stop or
    /// take level, publishing a closed event for each (spec §3: "closed
    /// by exit signal/stop").
    pub fn check_exits(&self) -> Vec<Position> {
        let hits: Vec<Symbol> = self
            .positions
            .iter()
            .filter(|entry| exit_triggered(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        hits.into_iter()
            .filter_map(|symbol| self.close_position(&symbol).transpose())
            .filter_map(|r| r.ok())
            .collect()
    }

    /// Closes a position unconditionally, e.g. on an external exit
    /// signal. Returns `Ok(None)` if no position was open for `symbol`.
    pub fn close_position(&self, symbol: &Symbol) -> ArbResult<Option<Position>> {
        let Some((_, mut position)) = self.positions.remove(symbol) else {
            return Ok(None);
        };
        position.closed_at = Some(Utc::now());
        position.realized_pnl = position.unrealized_pnl;
        debug!(symbol = %position.symbol, realized_pnl = %position.realized_pnl, "position closed");
        self.publish(streams::POSITIONS_CLOSED, &position)?;
        Ok(Some(position))
    }

    pub fn snapshot(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.get(symbol).map(|e| e.clone())
    }

    fn publish(&self, stream: &str, position: &Position) -> ArbResult<()> {
        self.event_bus.publish(
            stream,
            serde_json::json!({
                "symbol": position.symbol.as_str(),
                "side": format!("{:?}", position.side).to_uppercase(),
                "size": position.size,
                "entry_price": position.entry_price,
                "current_price": position.current_price,
                "unrealized_pnl": position.unrealized_pnl,
                "realized_pnl": position.realized_pnl,
                "stop_price": position.stop_price,
                "take_price": position.take_price,
                "opened_at": position.opened_at.to_rfc3339(),
                "closed_at": position.closed_at.map(|t| t.to_rfc3339()),
            }),
        )?;
        Ok(())
    }
}

impl OpenPositionsView for PositionManager {
    fn open_symbols(&self) -> Vec<Symbol> {
        self.positions.iter().map(|e| e.key().clone()).collect()
    }

    fn open_position_count(&self) -> u32 {
        self.positions.len() as u32
    }
}

/// Identifies the leg that filled and the quantity still uncovered by
/// the rollback order, if any. `None` if neither leg filled (a fully
/// failed execution never reaches `RolledBack`, but this stays defensive
/// against a malformed record rather than panicking on it).
fn residual_exposure(execution: &Execution) -> Option<(&Order, Decimal)> {
    let filled = if execution.buy_order.status == arb_types::OrderStatus::Filled {
        &execution.buy_order
    } else if execution.sell_order.status == arb_types::OrderStatus::Filled {
        &execution.sell_order
    } else {
        return None;
    };
    let covered = execution
        .rollback_order
        .as_ref()
        .map(|o| o.filled_qty)
        .unwrap_or(Decimal::ZERO);
    Some((filled, filled.filled_qty - covered))
}

fn exit_triggered(position: &Position) -> bool {
    let stop_hit = position.stop_price.is_some_and(|stop| match position.side {
        PositionSide::Long => position.current_price <= stop,
        PositionSide::Short => position.current_price >= stop,
    });
    let take_hit = position.take_price.is_some_and(|take| match position.side {
        PositionSide::Long => position.current_price >= take,
        PositionSide::Short => position.current_price <= take,
    });
    stop_hit || take_hit
}

/// A view over zero open positions, for callers that run without a
/// Position Manager (e.g. an execution-only deployment).
pub struct NoPositions;

impl OpenPositionsView for NoPositions {
    fn open_symbols(&self) -> Vec<Symbol> {
        Vec::new()
    }

    fn open_position_count(&self) -> u32 {
        0
    }
}
