//! S6 — Order timeout (spec §8): a resting order past `orderTimeout` is
//! cancelled by the Order Manager's monitoring loop, with a timeout
//! reason on `orders.cancelled`.

use std::sync::Arc;
use std::time::Duration;

use arb_types::{ClientOrderId, OpportunityId, OrderSide, OrderStatus, OrderType, Symbol, VenueId};
use connector_registry::ConnectorRegistry;
use event_bus::{EventBus, streams};
use execution_engine::order_manager::OrderManager;
use integration_tests::{Fill, MockConnector};
use rust_decimal_macros::dec;
use venue_connector::{NewOrder, RetryPolicy, VenueProfile};

#[tokio::test]
async fn pending_order_past_timeout_is_cancelled_with_reason() {
    let venue = Arc::new(MockConnector::new("venue_a").with_buy_fill(Fill::Pending));
    let registry = Arc::new(ConnectorRegistry::new());
    registry.insert(VenueId::new("venue_a"), venue, VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 });

    let event_bus = EventBus::new(64);
    let order_manager = Arc::new(OrderManager::new(
        registry,
        event_bus.clone(),
        RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 1,
            timeout: Duration::from_secs(2),
        },
        Duration::from_millis(50),
    ));

    let opp_id = OpportunityId::new();
    let order = order_manager
        .submit(
            NewOrder {
                client_id: ClientOrderId::for_leg(&opp_id, "buy"),
                symbol: Symbol::new("BTC", "USDT"),
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                qty: dec!(1),
                price: Some(dec!(50000)),
                stop_price: None,
                client_id_seed: opp_id.clone(),
            },
            VenueId::new("venue_a"),
        )
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let _monitor = order_manager.spawn_monitoring_loop();

    let cancelled = integration_tests::drain_stream(
        &event_bus,
        streams::ORDERS_CANCELLED,
        "s6-test",
        1,
        Duration::from_millis(800),
    )
    .await;

    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0]["reason"], "timeout");

    let final_order = order_manager.get(&order.id).expect("order still tracked");
    assert_eq!(final_order.status, OrderStatus::Cancelled);
}
