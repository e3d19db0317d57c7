//! S4 — Stream replay (spec §8): publish 5 messages, then attach a new
//! consumer group; it reads all 5, in order, from the start of the
//! stream rather than from whenever it was created.

use std::time::Duration;

use event_bus::{EventBus, streams};
use serde_json::json;

#[tokio::test]
async fn new_group_replays_the_full_stream_in_order() {
    let bus = EventBus::new(64);
    for i in 0..5 {
        bus.publish(streams::SIGNALS_GENERATED, json!({ "i": i })).unwrap();
    }

    let received = integration_tests::drain_stream(
        &bus,
        streams::SIGNALS_GENERATED,
        "replay-group",
        5,
        Duration::from_millis(500),
    )
    .await;

    assert_eq!(received.len(), 5);
    let indices: Vec<i64> = received.iter().map(|v| v["i"].as_i64().unwrap()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
}
