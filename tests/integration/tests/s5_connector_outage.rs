//! S5 — Connector outage (spec §8): a stalled venue drops out of the
//! reconciled quote but the other sources still produce one.

use std::sync::Arc;
use std::time::Duration;

use aggregator::DataAggregator;
use arb_types::Symbol;
use connector_registry::ConnectorRegistry;
use integration_tests::{MockConnector, ticker};
use rust_decimal_macros::dec;
use venue_connector::VenueProfile;

#[tokio::test]
async fn stalled_connector_is_excluded_but_quote_still_forms() {
    let symbol = Symbol::new("BTC", "USDT");

    let venue_a = Arc::new(MockConnector::new("venue_a").with_ticker(
        symbol.clone(),
        ticker(&symbol, "venue_a", dec!(50000), dec!(49995), dec!(50005)),
    ));
    let venue_b = Arc::new(MockConnector::new("venue_b").with_ticker(
        symbol.clone(),
        ticker(&symbol, "venue_b", dec!(50010), dec!(50005), dec!(50015)),
    ));
    let venue_c = Arc::new(
        MockConnector::new("venue_c")
            .with_ticker(symbol.clone(), ticker(&symbol, "venue_c", dec!(50005), dec!(50000), dec!(50010)))
            .with_market_data_delay(Duration::from_millis(200)),
    );

    let registry = Arc::new(ConnectorRegistry::new());
    let profile = VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 };
    registry.insert(arb_types::VenueId::new("venue_a"), venue_a, profile);
    registry.insert(arb_types::VenueId::new("venue_b"), venue_b, profile);
    registry.insert(arb_types::VenueId::new("venue_c"), venue_c, profile);

    // Per-task deadline shorter than venue_c's simulated stall, same as
    // the aggregator's own fan-out timeout guard.
    let aggregator = DataAggregator::new(registry, vec![], None, Duration::from_secs(30), Duration::from_millis(20));

    let quotes = aggregator.scan(&[symbol.clone()]).await;
    let quote = quotes.get(&symbol).expect("quote should still form from a, b");

    let source_names: Vec<&str> = quote.sources_used.iter().map(|v| v.as_str()).collect();
    assert!(source_names.contains(&"venue_a"));
    assert!(source_names.contains(&"venue_b"));
    assert!(!source_names.contains(&"venue_c"));
    assert!(quote.confidence >= 0.0);
}
