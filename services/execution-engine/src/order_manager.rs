//! # Order Manager
//!
//! Single point of truth for every live order (spec §4.7): validates,
//! dispatches to the right connector, and retains each order until it
//! reaches a terminal state via a 100ms monitoring loop and a 5-minute
//! cleanup loop.
//!
//! Grounded on `services/strategies/flash_arbitrage/src/executor.rs`'s
//! submit/poll/timeout shape, generalized from a one-shot flash-loan
//! submission into a persistent order table backed by two background
//! loops.

use std::sync::Arc;
use std::time::Duration;

use arb_types::{ArbError, ArbResult, ClientOrderId, Order, OrderStatus, OrderType, VenueId};
use chrono::Utc;
use connector_registry::ConnectorRegistry;
use dashmap::DashMap;
use event_bus::{EventBus, streams};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use venue_connector::{NewOrder, RetryPolicy};

const MONITOR_INTERVAL: Duration = Duration::from_millis(100);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const TERMINAL_RETENTION: Duration = Duration::from_secs(3600);

/// Validates, submits, and tracks orders (spec §4.7). Owns the single
/// order table every consumer reads through.
pub struct OrderManager {
    registry: Arc<ConnectorRegistry>,
    event_bus: EventBus,
    orders: DashMap<ClientOrderId, Order>,
    retry_policy: RetryPolicy,
    order_timeout: Duration,
}

impl OrderManager {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        event_bus: EventBus,
        retry_policy: RetryPolicy,
        order_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            event_bus,
            orders: DashMap::new(),
            retry_policy,
            order_timeout,
        }
    }

    fn validate(new_order: &NewOrder) -> ArbResult<()> {
        if new_order.qty <= Decimal::ZERO {
            return Err(ArbError::Invalid("order qty must be positive".into()));
        }
        match new_order.order_type {
            OrderType::Limit | OrderType::StopLimit if new_order.price.is_none() => {
                return Err(ArbError::Invalid("limit order requires a price".into()));
            }
            _ => {}
        }
        match new_order.order_type {
            OrderType::Stop | OrderType::StopLimit if new_order.stop_price.is_none() => {
                return Err(ArbError::Invalid("stop order requires a stop price".into()));
            }
            _ => {}
        }
        Ok(())
    }

    /// Submits one order, retrying transient placement failures up to
    /// `retryPolicy.attempts` (spec §4.7). A `Rejected` response from the
    /// venue is permanent and is returned immediately without consuming
    /// further retries.
    pub async fn submit(&self, new_order: NewOrder, venue: VenueId) -> ArbResult<Order> {
        Self::validate(&new_order)?;
        let connector = self
            .registry
            .get(&venue)
            .ok_or_else(|| ArbError::Invalid(format!("unknown venue {venue}")))?;

        let mut last_err = None;
        for attempt in 0..self.retry_policy.attempts {
            let attempt_result = tokio::time::timeout(
                self.retry_policy.timeout,
                connector.place_order(new_order.clone()),
            )
            .await;

            match attempt_result {
                Ok(Ok(order)) => {
                    self.orders.insert(order.id.clone(), order.clone());
                    self.publish(streams::ORDERS_SUBMITTED, &order)?;
                    return Ok(order);
                }
                Ok(Err(err @ ArbError::Rejected { .. })) => {
                    warn!(venue = %venue, %err, "order rejected, not retrying");
                    return Err(err);
                }
                Ok(Err(err)) => {
                    warn!(venue = %venue, attempt, %err, "order placement failed, retrying");
                    last_err = Some(err);
                }
                Err(_elapsed) => {
                    last_err = Some(ArbError::Timeout {
                        venue: venue.clone(),
                        operation: "place_order".into(),
                        elapsed_ms: self.retry_policy.timeout.as_millis() as u64,
                    });
                }
            }

            if attempt + 1 < self.retry_policy.attempts {
                let delay =
                    self.retry_policy.base_delay * self.retry_policy.backoff_multiplier.saturating_pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_err.unwrap_or_else(|| ArbError::Internal("order submission exhausted retries".into())))
    }

    pub fn get(&self, id: &ClientOrderId) -> Option<Order> {
        self.orders.get(id).map(|e| e.clone())
    }

    /// Polls the order table until `id` reaches a terminal state or
    /// `deadline` elapses (the Execution Engine's bounded await, spec
    /// §4.8 step 3). State only ever advances via the monitoring loop;
    /// this just watches for it.
    pub async fn await_terminal(&self, id: &ClientOrderId, deadline: Duration) -> ArbResult<Order> {
        let start = std::time::Instant::now();
        loop {
            if let Some(order) = self.get(id) {
                if order.status.is_terminal() {
                    return Ok(order);
                }
            }
            if start.elapsed() >= deadline {
                return Err(ArbError::Timeout {
                    venue: VenueId::new("order_manager"),
                    operation: "await_terminal".into(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(MONITOR_INTERVAL).await;
        }
    }

    /// Monitoring loop (spec §4.7): every 100ms, polls each open/partial
    /// order's connector, advances local state, and cancels orders that
    /// have sat `PENDING` past `orderTimeout`.
    pub fn spawn_monitoring_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            loop {
                ticker.tick().await;
                this.monitor_once().await;
            }
        })
    }

    async fn monitor_once(&self) {
        let open: Vec<Order> = self
            .orders
            .iter()
            .map(|e| e.value().clone())
            .filter(|o| !o.status.is_terminal())
            .collect();

        for order in open {
            let now = Utc::now();
            let age = (now - order.created_at).to_std().unwrap_or(Duration::ZERO);
            if order.status == OrderStatus::Pending && age >= self.order_timeout {
                self.cancel_as_timeout(&order).await;
                continue;
            }

            let Some(connector) = self.registry.get(&order.venue) else {
                continue;
            };
            let Some(venue_order_id) = order.venue_id.clone() else {
                continue;
            };
            match connector.get_order_status(&venue_order_id).await {
                Ok(updated) => self.apply_update(&order.id, updated),
                Err(err) => debug!(order_id = %order.id, %err, "order status poll failed"),
            }
        }
    }

    fn apply_update(&self, id: &ClientOrderId, updated: Order) {
        let Some(mut entry) = self.orders.get_mut(id) else {
            return;
        };
        let status_changed = entry.status != updated.status;
        *entry = updated.clone();
        drop(entry);

        if status_changed {
            let _ = self.publish(streams::ORDERS_UPDATED, &updated);
            if updated.status == OrderStatus::Filled {
                let _ = self.publish(streams::ORDERS_EXECUTED, &updated);
            }
        }
    }

    async fn cancel_as_timeout(&self, order: &Order) {
        if let Some(connector) = self.registry.get(&order.venue) {
            if let Some(venue_order_id) = &order.venue_id {
                let _ = connector.cancel_order(venue_order_id).await;
            }
        }
        let updated = {
            let Some(mut entry) = self.orders.get_mut(&order.id) else {
                return;
            };
            if entry.apply_status(OrderStatus::Cancelled, Utc::now()).is_err() {
                return;
            }
            entry.clone()
        };
        warn!(order_id = %order.id, "order cancelled: timeout");
        let _ = self.publish(streams::ORDERS_UPDATED, &updated);
        let _ = self.publish_cancelled(&updated, "timeout");
    }

    /// Cleanup loop (spec §4.7): every 5 minutes, purges terminal orders
    /// older than 1 hour.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                this.cleanup_once();
            }
        })
    }

    fn cleanup_once(&self) {
        let now = Utc::now();
        self.orders.retain(|_, order| {
            if !order.status.is_terminal() {
                return true;
            }
            let age = (now - order.updated_at).to_std().unwrap_or(Duration::ZERO);
            age < TERMINAL_RETENTION
        });
    }

    fn publish(&self, stream: &str, order: &Order) -> ArbResult<()> {
        self.event_bus.publish(
            stream,
            serde_json::json!({
                "id": order.id.as_str(),
                "venue_order_id": order.venue_id.as_ref().map(|v| v.as_str()),
                "symbol": order.symbol.as_str(),
                "side": format!("{:?}", order.side).to_uppercase(),
                "order_type": format!("{:?}", order.order_type).to_uppercase(),
                "qty": order.qty,
                "price": order.price,
                "filled_qty": order.filled_qty,
                "avg_price": order.avg_price,
                "status": format!("{:?}", order.status).to_uppercase(),
                "venue": order.venue.as_str(),
                "timestamp": order.updated_at.to_rfc3339(),
            }),
        )?;
        Ok(())
    }

    /// Cancellation carries a reason the plain `publish` envelope has no
    /// field for (spec §8 S6: `orders.cancelled` with `reason: "timeout"`).
    fn publish_cancelled(&self, order: &Order, reason: &str) -> ArbResult<()> {
        self.event_bus.publish(
            streams::ORDERS_CANCELLED,
            serde_json::json!({
                "id": order.id.as_str(),
                "venue_order_id": order.venue_id.as_ref().map(|v| v.as_str()),
                "symbol": order.symbol.as_str(),
                "status": format!("{:?}", order.status).to_uppercase(),
                "venue": order.venue.as_str(),
                "reason": reason,
                "timestamp": order.updated_at.to_rfc3339(),
            }),
        )?;
        Ok(())
    }
}
