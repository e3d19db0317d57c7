//! Cross-crate property tests for spec §8's quantified invariants that
//! don't fit neatly into one crate's own `#[cfg(test)]` module.

use std::sync::Arc;

use aggregator::DataAggregator;
use arb_types::{OrderSide, Symbol};
use arbitrage_engine::{ArbitrageEngine, NoOpenPositions};
use connector_registry::ConnectorRegistry;
use event_bus::{EventBus, streams};
use integration_tests::{MockConnector, one_level_book, ticker};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use venue_connector::VenueProfile;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

async fn confidence_for(prices: &[u32]) -> f64 {
    let symbol = Symbol::new("BTC", "USDT");
    let registry = Arc::new(ConnectorRegistry::new());
    for (i, price) in prices.iter().enumerate() {
        let price = Decimal::from_u32(*price).unwrap();
        let connector = Arc::new(MockConnector::new(format!("venue_{i}")).with_ticker(
            symbol.clone(),
            ticker(&symbol, &format!("venue_{i}"), price, price, price),
        ));
        registry.insert(
            arb_types::VenueId::new(format!("venue_{i}")),
            connector,
            VenueProfile { taker_fee: rust_decimal_macros::dec!(0.001), trust_score: 0.9 },
        );
    }
    let aggregator = DataAggregator::with_defaults(registry, vec![]);
    let quotes = aggregator.scan(&[symbol.clone()]).await;
    quotes.get(&symbol).map(|q| q.confidence).unwrap_or(0.0)
}

proptest! {
    // Property 3 (spec §8): confidence always lands in [0, 1], for any
    // 2-5 source prices within a plausible venue-disagreement range.
    #[test]
    fn confidence_is_always_bounded(prices in prop::collection::vec(45_000u32..55_000, 2..6)) {
        let confidence = runtime().block_on(confidence_for(&prices));
        prop_assert!(confidence >= 0.0 && confidence <= 1.0);
    }
}

#[tokio::test]
async fn tighter_spread_yields_higher_or_equal_confidence() {
    let tight = confidence_for(&[50_000, 50_010, 49_995]).await;
    let wide = confidence_for(&[40_000, 50_000, 60_000]).await;
    assert!(tight >= wide);
}

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

// Property 4 (spec §8): every published opportunity's spreadPct matches
// (sellPx - buyPx) / buyPx exactly, and its two venues are never equal.
#[tokio::test]
async fn published_opportunity_satisfies_spread_formula() {
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
    let risk_manager = Arc::new(risk_manager::RiskManager::new(cfg.risk.clone()));
    let event_bus = EventBus::new(64);
    let engine = Arc::new(ArbitrageEngine::new(
        aggregator,
        registry,
        risk_manager,
        event_bus.clone(),
        Arc::new(NoOpenPositions),
        &cfg,
    ));

    engine.run_cycle().await.unwrap();
    let published = integration_tests::drain_stream(
        &event_bus,
        streams::ARBITRAGE_OPPORTUNITIES,
        "property4-test",
        1,
        std::time::Duration::from_millis(500),
    )
    .await;
    let opp = published.first().expect("opportunity should have been published");

    let buy_price: Decimal = opp["buy_price"].as_str().map(|s| s.parse().unwrap()).unwrap_or_else(|| {
        Decimal::from_f64_retain(opp["buy_price"].as_f64().unwrap()).unwrap()
    });
    let sell_price: Decimal = opp["sell_price"].as_str().map(|s| s.parse().unwrap()).unwrap_or_else(|| {
        Decimal::from_f64_retain(opp["sell_price"].as_f64().unwrap()).unwrap()
    });
    let spread_pct: Decimal = opp["spread_pct"].as_str().map(|s| s.parse().unwrap()).unwrap_or_else(|| {
        Decimal::from_f64_retain(opp["spread_pct"].as_f64().unwrap()).unwrap()
    });

    let expected = (sell_price - buy_price) / buy_price;
    assert!((spread_pct - expected).abs() < dec!(0.000000001));
    assert_ne!(opp["buy_venue"], opp["sell_venue"]);
}

#[test]
fn opposite_side_reverses_buy_and_sell() {
    assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    assert_ne!(OrderSide::Buy, OrderSide::Buy.opposite());
}
