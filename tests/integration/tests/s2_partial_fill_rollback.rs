//! S2 — One leg fills, the other is rejected outright; the filled leg
//! rolls back (spec §8).

use std::sync::Arc;
use std::time::Duration;

use arb_types::{ExecutionStatus, Opportunity, OpportunityId, Symbol, VenueId};
use chrono::Utc;
use connector_registry::ConnectorRegistry;
use event_bus::EventBus;
use execution_engine::ExecutionEngine;
use execution_engine::order_manager::OrderManager;
use integration_tests::{Fill, MockConnector};
use rust_decimal_macros::dec;
use venue_connector::{RetryPolicy, VenueProfile};

fn sample_opportunity() -> Opportunity {
    Opportunity {
        id: OpportunityId::new(),
        symbol: Symbol::new("BTC", "USDT"),
        buy_venue: VenueId::new("venue_a"),
        sell_venue: VenueId::new("venue_b"),
        buy_price: dec!(50005),
        sell_price: dec!(50995),
        spread: dec!(990),
        spread_pct: dec!(0.0198),
        tradable_size: dec!(1),
        gross_profit: dec!(990),
        fees: dec!(150.015),
        net_profit: dec!(794.985),
        risk_score: 0.2,
        confidence: 0.95,
        est_exec_seconds: 1.0,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn rejected_counterpart_triggers_rollback_of_filled_leg() {
    let venue_a = Arc::new(
        MockConnector::new("venue_a")
            .with_buy_fill(Fill::Filled(dec!(50005)))
            .with_sell_fill(Fill::Filled(dec!(49990))),
    );
    let venue_b = Arc::new(MockConnector::new("venue_b").with_sell_fill(Fill::Rejected("insufficient liquidity".into())));

    let registry = Arc::new(ConnectorRegistry::new());
    registry.insert(VenueId::new("venue_a"), venue_a, VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 });
    registry.insert(VenueId::new("venue_b"), venue_b, VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 });

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
        Duration::from_secs(30),
    ));
    let engine = ExecutionEngine::new(order_manager, event_bus, 4);

    let opp = sample_opportunity();
    let execution = engine.execute(opp.clone()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::RolledBack);
    // buy filled at 50005, rollback sell filled at 49990: (49990 - 50005) - fees.
    assert_eq!(execution.net_profit, dec!(49990) - dec!(50005) - opp.fees);
    assert!(execution.rollback_order.is_some());
    assert_eq!(execution.buy_order.side, arb_types::OrderSide::Buy);
    assert_eq!(execution.buy_order.filled_qty, dec!(1));
    assert_eq!(execution.sell_order.status, arb_types::OrderStatus::Rejected);
}
