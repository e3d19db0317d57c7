//! Property 9 (spec §8): within `aggregatorCacheTtlSeconds`, two scans of
//! the same symbol set return the same snapshot without re-fetching; once
//! the TTL elapses, a fresh scan is performed.

use std::sync::Arc;
use std::time::Duration;

use aggregator::DataAggregator;
use arb_types::Symbol;
use connector_registry::ConnectorRegistry;
use integration_tests::{MockConnector, ticker};
use rust_decimal_macros::dec;
use venue_connector::VenueProfile;

#[tokio::test]
async fn repeated_scan_within_ttl_hits_cache_then_refetches_after_expiry() {
    let symbol = Symbol::new("BTC", "USDT");
    let connector = Arc::new(MockConnector::new("venue_a").with_ticker(
        symbol.clone(),
        ticker(&symbol, "venue_a", dec!(50000), dec!(49995), dec!(50005)),
    ));

    let registry = Arc::new(ConnectorRegistry::new());
    registry.insert(
        arb_types::VenueId::new("venue_a"),
        connector.clone(),
        VenueProfile { taker_fee: dec!(0.001), trust_score: 0.9 },
    );

    let aggregator = DataAggregator::new(registry, vec![], None, Duration::from_millis(100), Duration::from_secs(2));

    let first = aggregator.scan(&[symbol.clone()]).await;
    assert_eq!(connector.market_data_calls(), 1);
    assert!(!first.get(&symbol).unwrap().from_cache);

    let second = aggregator.scan(&[symbol.clone()]).await;
    assert_eq!(connector.market_data_calls(), 1, "second scan within TTL should not re-fetch");
    assert!(second.get(&symbol).unwrap().from_cache);
    assert_eq!(first.get(&symbol).unwrap().mid, second.get(&symbol).unwrap().mid);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let third = aggregator.scan(&[symbol.clone()]).await;
    assert_eq!(connector.market_data_calls(), 2, "scan past TTL should re-fetch");
    assert!(!third.get(&symbol).unwrap().from_cache);
}
