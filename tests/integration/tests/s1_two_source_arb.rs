//! S1 — Two-source arb detected (spec §8).

use std::sync::Arc;
use std::time::Duration;

use aggregator::DataAggregator;
use arb_types::Symbol;
use arbitrage_engine::{ArbitrageEngine, NoOpenPositions};
use connector_registry::ConnectorRegistry;
use event_bus::{EventBus, streams};
use integration_tests::{MockConnector, one_level_book, ticker};
use risk_manager::RiskManager;
use rust_decimal_macros::dec;
use venue_connector::VenueProfile;

fn write_config(dir: &std::path::Path) -> config::ArbConfig {
    let path = dir.join("arbitrage.toml");
    std::fs::write(
        &path,
        r#"
min_spread_pct = "0.001"
min_profit = "0"

[risk]
max_position_size = "1000000"
max_daily_loss = "1000000"
max_daily_trades = 1000
max_position_risk = "0.5"
max_open_positions = 100

watchlist = ["BTC/USDT"]
"#,
    )
    .unwrap();
    config::ArbConfig::load(Some(&path)).unwrap()
}

#[tokio::test]
async fn two_source_spread_is_detected_and_published() {
    let symbol = Symbol::new("BTC", "USDT");

    let venue_a = Arc::new(
        MockConnector::new("venue_a")
            .with_ticker(symbol.clone(), ticker(&symbol, "venue_a", dec!(50000), dec!(49995), dec!(50005)))
            .with_order_book(symbol.clone(), one_level_book(&symbol, "venue_a", dec!(49995), dec!(50005), dec!(5)))
            .with_balance("USDT", dec!(1_000_000)),
    );
    let venue_b = Arc::new(
        MockConnector::new("venue_b")
            .with_ticker(symbol.clone(), ticker(&symbol, "venue_b", dec!(51000), dec!(50995), dec!(51005)))
            .with_order_book(symbol.clone(), one_level_book(&symbol, "venue_b", dec!(50995), dec!(51005), dec!(5)))
            .with_balance("BTC", dec!(10)),
    );

    let registry = Arc::new(ConnectorRegistry::new());
    registry.insert(arb_types::VenueId::new("venue_a"), venue_a, VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 });
    registry.insert(arb_types::VenueId::new("venue_b"), venue_b, VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 });

    let aggregator = Arc::new(DataAggregator::with_defaults(registry.clone(), vec![]));

    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    let risk_manager = Arc::new(RiskManager::new(cfg.risk.clone()));

    let event_bus = EventBus::new(64);
    let engine = Arc::new(ArbitrageEngine::new(
        aggregator,
        registry,
        risk_manager,
        event_bus.clone(),
        Arc::new(NoOpenPositions),
        &cfg,
    ));

    let accepted = engine.run_cycle().await.unwrap();
    assert_eq!(accepted, 1);

    let published = integration_tests::drain_stream(
        &event_bus,
        streams::ARBITRAGE_OPPORTUNITIES,
        "s1-test",
        1,
        Duration::from_millis(500),
    )
    .await;
    assert_eq!(published.len(), 1);
    let opp = &published[0];
    assert_eq!(opp["buy_venue"], "venue_a");
    assert_eq!(opp["sell_venue"], "venue_b");
}
