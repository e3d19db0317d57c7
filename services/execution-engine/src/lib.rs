//! # Execution Engine
//!
//! Turns an accepted `Opportunity` into a paired execution (spec §4.8):
//! submits both legs concurrently through the Order Manager, awaits both
//! terminal states under a bounded deadline, and rolls back the filled
//! leg if its counterpart didn't also fill. At most one execution is
//! in flight per `(symbol, buyVenue, sellVenue)` triple.
//!
//! Grounded on `services/strategies/flash_arbitrage/src/executor.rs`'s
//! submission/confirmation shape, generalized from a single atomic
//! flash-loan transaction to two independently tracked CEX orders, plus
//! a rollback path the teacher's on-chain executor doesn't need (a flash
//! loan reverts atomically on-chain; CEX legs don't).

pub mod order_manager;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arb_types::{
    ArbResult, ClientOrderId, Execution, ExecutionId, ExecutionStatus, Opportunity, Order,
    OrderSide, OrderStatus, OrderType, Symbol, VenueId,
};
use chrono::Utc;
use dashmap::DashMap;
use event_bus::{EventBus, streams};
use order_manager::OrderManager;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use venue_connector::NewOrder;

const DEFAULT_SAFETY_FACTOR: f64 = 2.0;
const MIN_DEADLINE: Duration = Duration::from_secs(1);

/// Net result of a rolled-back execution (spec §8 S2: `netProfit =
/// (fillPx_sell_on_A − 50005) − fees`, generalized to either leg filling
/// first): the signed difference between the reversal's fill value and
/// the original leg's fill value, minus fees. A buy leg is reversed by
/// selling back, so the rollback recovers value; a sell leg is reversed
/// by buying back, so the rollback consumes value.
fn rollback_realized_loss(opp: &Opportunity, filled: &Order, rollback: &Option<Order>) -> Decimal {
    let Some(rollback) = rollback else {
        return -opp.fees;
    };
    let filled_value = filled.avg_price * filled.filled_qty;
    let rollback_value = rollback.avg_price * rollback.filled_qty;
    let delta = match filled.side {
        OrderSide::Buy => rollback_value - filled_value,
        OrderSide::Sell => filled_value - rollback_value,
    };
    delta - opp.fees
}

/// Key identifying one in-flight execution slot (spec §4.8: "at-most-one
/// in-flight execution per `(symbol, buyVenue, sellVenue)` triple").
type ExecutionKey = (Symbol, VenueId, VenueId);

/// Coordinates paired order execution (spec §4.8).
pub struct ExecutionEngine {
    order_manager: Arc<OrderManager>,
    event_bus: EventBus,
    semaphore: Arc<Semaphore>,
    in_flight: DashMap<ExecutionKey, ()>,
    safety_factor: f64,
}

impl ExecutionEngine {
    pub fn new(
        order_manager: Arc<OrderManager>,
        event_bus: EventBus,
        max_concurrent_executions: usize,
    ) -> Self {
        Self {
            order_manager,
            event_bus,
            semaphore: Arc::new(Semaphore::new(max_concurrent_executions)),
            in_flight: DashMap::new(),
            safety_factor: DEFAULT_SAFETY_FACTOR,
        }
    }

    /// Executes one opportunity end to end. Rejects the call outright
    /// (without consuming a semaphore permit) if its `(symbol, buyVenue,
    /// sellVenue)` triple already has an execution in flight.
    pub async fn execute(&self, opp: Opportunity) -> ArbResult<Execution> {
        let key: ExecutionKey = (opp.symbol.clone(), opp.buy_venue.clone(), opp.sell_venue.clone());
        if self.in_flight.insert(key.clone(), ()).is_some() {
            return Err(arb_types::ArbError::Invalid(format!(
                "execution already in flight for {}/{}/{}",
                key.0, key.1, key.2
            )));
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| arb_types::ArbError::Internal("execution semaphore closed".into()))?;

        let result = self.run(&opp).await;

        drop(permit);
        self.in_flight.remove(&key);
        result
    }

    async fn run(&self, opp: &Opportunity) -> ArbResult<Execution> {
        let start = Instant::now();
        let deadline = Duration::from_secs_f64((opp.est_exec_seconds * self.safety_factor).max(MIN_DEADLINE.as_secs_f64()));

        let buy_new = leg_order(opp, OrderSide::Buy);
        let sell_new = leg_order(opp, OrderSide::Sell);

        let (buy_submit, sell_submit) = tokio::join!(
            self.order_manager.submit(buy_new, opp.buy_venue.clone()),
            self.order_manager.submit(sell_new, opp.sell_venue.clone()),
        );

        let execution = match (buy_submit, sell_submit) {
            (Ok(buy_order), Ok(sell_order)) => {
                self.await_and_finalize(opp, buy_order, sell_order, deadline, start).await
            }
            (Ok(placed), Err(err)) => {
                warn!(%err, leg = "sell", "counterpart leg failed to submit");
                let other = stub_order(opp, OrderSide::Sell, OrderStatus::Rejected);
                self.await_single_leg_and_finalize(opp, placed, other, deadline, start).await
            }
            (Err(err), Ok(placed)) => {
                warn!(%err, leg = "buy", "counterpart leg failed to submit");
                let other = stub_order(opp, OrderSide::Buy, OrderStatus::Rejected);
                self.await_single_leg_and_finalize(opp, other, placed, deadline, start).await
            }
            (Err(buy_err), Err(sell_err)) => {
                warn!(%buy_err, %sell_err, "both legs failed to submit");
                self.finish(
                    opp,
                    ExecutionStatus::Failed,
                    stub_order(opp, OrderSide::Buy, OrderStatus::Rejected),
                    stub_order(opp, OrderSide::Sell, OrderStatus::Rejected),
                    Decimal::ZERO,
                    Decimal::ZERO,
                    start,
                    None,
                )
            }
        };

        self.publish(&execution)?;
        Ok(execution)
    }

    /// Both legs placed: await both, then branch on the state machine
    /// (spec §4.8 steps 3-6).
    async fn await_and_finalize(
        &self,
        opp: &Opportunity,
        buy_order: Order,
        sell_order: Order,
        deadline: Duration,
        start: Instant,
    ) -> Execution {
        let (buy_final, sell_final) = tokio::join!(
            self.order_manager.await_terminal(&buy_order.id, deadline),
            self.order_manager.await_terminal(&sell_order.id, deadline),
        );

        let buy = buy_final.unwrap_or(buy_order);
        let sell = sell_final.unwrap_or(sell_order);

        let buy_filled = buy.status == OrderStatus::Filled;
        let sell_filled = sell.status == OrderStatus::Filled;

        if buy_filled && sell_filled {
            let actual_profit = sell.avg_price * sell.filled_qty - buy.avg_price * buy.filled_qty - opp.fees;
            info!(symbol = %opp.symbol, actual_profit = %actual_profit, "execution completed");
            self.finish(opp, ExecutionStatus::Completed, buy, sell, actual_profit, opp.fees, start, None)
        } else if buy_filled != sell_filled {
            let (filled, other) = if buy_filled { (buy, sell) } else { (sell, buy) };
            let rollback = self.rollback_leg(opp, &filled).await;
            let realized_loss = rollback_realized_loss(opp, &filled, &rollback);
            self.finish(opp, ExecutionStatus::RolledBack, filled, other, realized_loss, opp.fees, start, rollback)
        } else {
            self.finish(opp, ExecutionStatus::Failed, buy, sell, Decimal::ZERO, Decimal::ZERO, start, None)
        }
    }

    /// One leg placed, the other failed outright at submission time:
    /// still await the placed leg, since it may fill on the venue, and
    /// roll it back if it does.
    async fn await_single_leg_and_finalize(
        &self,
        opp: &Opportunity,
        buy: Order,
        sell: Order,
        deadline: Duration,
        start: Instant,
    ) -> Execution {
        let placed_is_buy = buy.status != OrderStatus::Rejected;
        let (placed, other) = if placed_is_buy { (&buy, &sell) } else { (&sell, &buy) };

        let final_placed = self
            .order_manager
            .await_terminal(&placed.id, deadline)
            .await
            .unwrap_or_else(|_| placed.clone());

        if final_placed.status == OrderStatus::Filled {
            let rollback = self.rollback_leg(opp, &final_placed).await;
            let realized_loss = rollback_realized_loss(opp, &final_placed, &rollback);
            if placed_is_buy {
                self.finish(opp, ExecutionStatus::RolledBack, final_placed, other.clone(), realized_loss, opp.fees, start, rollback)
            } else {
                self.finish(opp, ExecutionStatus::RolledBack, other.clone(), final_placed, realized_loss, opp.fees, start, rollback)
            }
        } else if placed_is_buy {
            self.finish(opp, ExecutionStatus::Failed, final_placed, other.clone(), Decimal::ZERO, Decimal::ZERO, start, None)
        } else {
            self.finish(opp, ExecutionStatus::Failed, other.clone(), final_placed, Decimal::ZERO, Decimal::ZERO, start, None)
        }
    }

    /// Reverses a filled leg at market on the venue it filled on (spec
    /// §4.8 step 5). Returns `None` if the reversal itself couldn't be
    /// submitted; the execution still records the original loss.
    async fn rollback_leg(&self, opp: &Opportunity, filled: &Order) -> Option<Order> {
        let reversal = NewOrder {
            client_id: ClientOrderId::for_leg(&opp.id, "rollback"),
            symbol: opp.symbol.clone(),
            side: filled.side.opposite(),
            order_type: OrderType::Market,
            qty: filled.filled_qty,
            price: None,
            stop_price: None,
            client_id_seed: opp.id.clone(),
        };
        match self.order_manager.submit(reversal, filled.venue.clone()).await {
            Ok(order) => Some(order),
            Err(err) => {
                warn!(%err, "rollback order failed to submit");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        opp: &Opportunity,
        status: ExecutionStatus,
        buy_order: Order,
        sell_order: Order,
        net_profit: Decimal,
        fees_paid: Decimal,
        start: Instant,
        rollback_order: Option<Order>,
    ) -> Execution {
        Execution {
            id: ExecutionId::new(),
            opportunity: opp.clone(),
            buy_order,
            sell_order,
            status,
            net_profit,
            fees_paid,
            elapsed_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            rollback_order,
        }
    }

    fn publish(&self, execution: &Execution) -> ArbResult<()> {
        self.event_bus.publish(
            streams::ARBITRAGE_EXECUTIONS,
            serde_json::json!({
                "id": execution.id.as_str(),
                "opportunity_id": execution.opportunity.id.as_str(),
                "symbol": execution.opportunity.symbol.as_str(),
                "status": format!("{:?}", execution.status).to_uppercase(),
                "net_profit": execution.net_profit,
                "fees_paid": execution.fees_paid,
                "elapsed_ms": execution.elapsed_ms,
                "rolled_back": execution.rollback_order.is_some(),
                "timestamp": execution.timestamp.to_rfc3339(),
            }),
        )?;
        Ok(())
    }
}

fn leg_order(opp: &Opportunity, side: OrderSide) -> NewOrder {
    let leg = match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    };
    NewOrder {
        client_id: ClientOrderId::for_leg(&opp.id, leg),
        symbol: opp.symbol.clone(),
        side,
        order_type: OrderType::Market,
        qty: opp.tradable_size,
        price: None,
        stop_price: None,
        client_id_seed: opp.id.clone(),
    }
}

/// A placeholder terminal order for a leg that never made it past
/// submission (the venue call itself errored, so no `Order` exists).
/// Keeps `Execution.buy_order`/`sell_order` populated even on a
/// both-legs-failed outcome.
fn stub_order(opp: &Opportunity, side: OrderSide, status: OrderStatus) -> Order {
    let leg = match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    };
    let now = Utc::now();
    Order {
        id: ClientOrderId::for_leg(&opp.id, leg),
        venue_id: None,
        symbol: opp.symbol.clone(),
        side,
        order_type: OrderType::Market,
        qty: opp.tradable_size,
        price: None,
        stop_price: None,
        filled_qty: Decimal::ZERO,
        avg_price: Decimal::ZERO,
        status,
        venue: match side {
            OrderSide::Buy => opp.buy_venue.clone(),
            OrderSide::Sell => opp.sell_venue.clone(),
        },
        created_at: now,
        updated_at: now,
        client_id_seed: opp.id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_types::OpportunityId;
    use rust_decimal_macros::dec;

    fn sample_opportunity() -> Opportunity {
        Opportunity {
            id: OpportunityId::new(),
            symbol: Symbol::new("BTC", "USDT"),
            buy_venue: VenueId::new("binance"),
            sell_venue: VenueId::new("coinbase"),
            buy_price: dec!(100),
            sell_price: dec!(101),
            spread: dec!(1),
            spread_pct: dec!(0.01),
            tradable_size: dec!(1),
            gross_profit: dec!(1),
            fees: dec!(0.1),
            net_profit: dec!(0.9),
            risk_score: 0.2,
            confidence: 0.9,
            est_exec_seconds: 2.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn stub_order_is_immediately_terminal() {
        let opp = sample_opportunity();
        let order = stub_order(&opp, OrderSide::Buy, OrderStatus::Rejected);
        assert!(order.status.is_terminal());
        assert_eq!(order.filled_qty, Decimal::ZERO);
    }

    #[test]
    fn leg_order_uses_opportunity_size_and_symbol() {
        let opp = sample_opportunity();
        let buy = leg_order(&opp, OrderSide::Buy);
        assert_eq!(buy.qty, opp.tradable_size);
        assert_eq!(buy.symbol, opp.symbol);
        assert_eq!(buy.side, OrderSide::Buy);
    }

    #[test]
    fn completed_profit_subtracts_estimated_fees() {
        let opp = sample_opportunity();
        let buy_cost = dec!(100) * dec!(1);
        let sell_proceeds = dec!(101) * dec!(1);
        let actual_profit = sell_proceeds - buy_cost - opp.fees;
        assert_eq!(actual_profit, dec!(0.9));
    }

    fn filled_order(opp: &Opportunity, side: OrderSide, venue: VenueId, avg_price: Decimal) -> Order {
        let mut order = stub_order(opp, side, OrderStatus::Filled);
        order.venue = venue;
        order.filled_qty = opp.tradable_size;
        order.avg_price = avg_price;
        order
    }

    #[test]
    fn rollback_loss_reflects_reversal_fill_price_on_filled_buy_leg() {
        let opp = sample_opportunity();
        let filled = filled_order(&opp, OrderSide::Buy, opp.buy_venue.clone(), dec!(100));
        let rollback = Some(filled_order(&opp, OrderSide::Sell, opp.buy_venue.clone(), dec!(95)));
        // sold back for less than bought: (95 - 100) - 0.1
        let realized_loss = rollback_realized_loss(&opp, &filled, &rollback);
        assert_eq!(realized_loss, dec!(95) - dec!(100) - opp.fees);
    }

    #[test]
    fn rollback_loss_reflects_reversal_fill_price_on_filled_sell_leg() {
        let opp = sample_opportunity();
        let filled = filled_order(&opp, OrderSide::Sell, opp.sell_venue.clone(), dec!(101));
        let rollback = Some(filled_order(&opp, OrderSide::Buy, opp.sell_venue.clone(), dec!(103)));
        // bought back for more than sold: (101 - 103) - 0.1
        let realized_loss = rollback_realized_loss(&opp, &filled, &rollback);
        assert_eq!(realized_loss, dec!(101) - dec!(103) - opp.fees);
    }

    #[test]
    fn rollback_loss_falls_back_to_negative_fees_when_reversal_unsubmitted() {
        let opp = sample_opportunity();
        let filled = filled_order(&opp, OrderSide::Buy, opp.buy_venue.clone(), dec!(100));
        let realized_loss = rollback_realized_loss(&opp, &filled, &None);
        assert_eq!(realized_loss, -opp.fees);
    }
}
