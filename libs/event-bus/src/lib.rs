//! # Event Bus
//!
//! The single coordination substrate (spec §4.9): append-only named
//! streams with consumer-group semantics — at-least-once delivery,
//! explicit acknowledgement, bounded stream length, per-stream ordering.
//!
//! Grounded on `libs/messaging/relays/core/src/types.rs` (`RelayMessage`,
//! topic concept) and `topics/mod.rs` (`DashMap`-based registry), but the
//! teacher's bincode-over-TCP relay transport is replaced with an
//! in-process, JSON-payload, bounded ring buffer per stream plus
//! per-`(stream, group)` cursors: spec §4.9's bus is a local coordination
//! substrate with Redis-Streams-shaped semantics (see
//! `examples/original_source/src/utils/messaging/redis_bus.py`), not a
//! cross-process pub/sub relay. The teacher's wildcard topic matching has
//! no counterpart here since spec §4.9 names a fixed, closed set of
//! streams (see [`streams`]).

pub mod streams;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arb_types::{ArbError, ArbResult};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, warn};

/// A message as delivered to a consumer: the envelope spec §6 describes
/// (`{stream, ...payload}`) plus the bus-assigned, per-stream-monotone id
/// needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: u64,
    pub stream: String,
    pub payload: Value,
    pub redelivery_count: u32,
}

const DEFAULT_MAX_LEN: usize = 10_000;
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct StreamState {
    entries: VecDeque<(u64, Value)>,
    next_id: u64,
    max_len: usize,
}

impl StreamState {
    fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
            max_len,
        }
    }

    fn push(&mut self, payload: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back((id, payload));
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
        id
    }

    fn entries_from(&self, from_id: u64, limit: usize) -> Vec<(u64, Value)> {
        self.entries
            .iter()
            .filter(|(id, _)| *id >= from_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

struct PendingEntry {
    delivered_at: Instant,
    redelivery_count: u32,
}

#[derive(Default)]
struct GroupState {
    /// Lowest id not yet handed out to any consumer in this group.
    next_new_id: u64,
    /// Ids delivered but not yet acknowledged, with redelivery bookkeeping.
    pending: HashMap<u64, PendingEntry>,
}

/// The append-only, bounded, consumer-group-aware bus (spec §4.9).
///
/// Cloning an `EventBus` handle is cheap (internals are `Arc`-shared); the
/// usual pattern is one `EventBus` built at startup and cloned into every
/// component that publishes or consumes.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    streams: DashMap<String, RwLock<StreamState>>,
    groups: DashMap<(String, String), RwLock<GroupState>>,
    max_len: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

impl EventBus {
    pub fn new(max_len: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: DashMap::new(),
                groups: DashMap::new(),
                max_len,
            }),
        }
    }

    /// Append `payload` to `stream`, returning the bus-assigned message id.
    /// Ids are strictly increasing per stream (spec §8 property 1). The
    /// payload must be a JSON object carrying at least `timestamp`
    /// (spec §6); callers that don't supply one get it stamped in.
    pub fn publish(&self, stream: &str, mut payload: Value) -> ArbResult<u64> {
        if let Value::Object(map) = &mut payload {
            map.entry("timestamp")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        } else {
            return Err(ArbError::Invalid(
                "event bus payload must be a JSON object".into(),
            ));
        }

        let entry = self
            .inner
            .streams
            .entry(stream.to_string())
            .or_insert_with(|| RwLock::new(StreamState::new(self.inner.max_len)));
        let id = entry.write().push(payload);
        debug!(stream, id, "published message");
        Ok(id)
    }

    /// Number of messages currently retained for `stream` (test/observability helper).
    pub fn stream_len(&self, stream: &str) -> usize {
        self.inner
            .streams
            .get(stream)
            .map(|s| s.read().entries.len())
            .unwrap_or(0)
    }

    fn group_key(stream: &str, group: &str) -> (String, String) {
        (stream.to_string(), group.to_string())
    }

    /// Pull up to `batch_size` messages for `(stream, group)`: first any
    /// pending entries whose visibility timeout has expired (redelivery),
    /// then fresh entries the group hasn't handed out yet. Delivered
    /// entries are marked pending until `ack` is called.
    fn poll_batch(&self, stream: &str, group: &str, batch_size: usize) -> Vec<StreamMessage> {
        let Some(stream_state) = self.inner.streams.get(stream) else {
            return Vec::new();
        };
        let stream_state = stream_state.read();

        let group_entry = self
            .inner
            .groups
            .entry(Self::group_key(stream, group))
            .or_insert_with(|| RwLock::new(GroupState::default()));
        let mut group_state = group_entry.write();

        let mut out = Vec::with_capacity(batch_size);
        let now = Instant::now();

        // Redeliver anything past its visibility timeout first, so a
        // crashed consumer doesn't starve the rest of the group.
        let expired: Vec<u64> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= VISIBILITY_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if out.len() >= batch_size {
                break;
            }
            if let Some((_, payload)) = stream_state.entries.iter().find(|(eid, _)| *eid == id) {
                let pending = group_state.pending.get_mut(&id).unwrap();
                pending.redelivery_count += 1;
                pending.delivered_at = now;
                out.push(StreamMessage {
                    id,
                    stream: stream.to_string(),
                    payload: payload.clone(),
                    redelivery_count: pending.redelivery_count,
                });
            }
        }

        if out.len() < batch_size {
            let remaining = batch_size - out.len();
            let fresh = stream_state.entries_from(group_state.next_new_id, remaining);
            for (id, payload) in fresh {
                group_state.next_new_id = group_state.next_new_id.max(id + 1);
                group_state.pending.insert(
                    id,
                    PendingEntry {
                        delivered_at: now,
                        redelivery_count: 0,
                    },
                );
                out.push(StreamMessage {
                    id,
                    stream: stream.to_string(),
                    payload,
                    redelivery_count: 0,
                });
            }
        }

        out
    }

    fn ack(&self, stream: &str, group: &str, id: u64) {
        if let Some(group_entry) = self.inner.groups.get(&Self::group_key(stream, group)) {
            group_entry.write().pending.remove(&id);
        }
    }

    /// Long-poll consume loop for one `(stream, group, consumer)` binding
    /// (spec §5: one task per binding). Runs until `stop()` is called on
    /// the returned handle. On handler success the message is acknowledged
    /// and never redelivered within `group`; on handler failure it is left
    /// pending and reappears after the visibility timeout (at-least-once,
    /// spec §8 property 2).
    pub fn spawn_consumer<F, Fut>(
        &self,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        block: Duration,
        batch_size: usize,
        mut handler: F,
    ) -> ConsumerHandle
    where
        F: FnMut(StreamMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ArbResult<()>> + Send,
    {
        let stream = stream.into();
        let group = group.into();
        let consumer = consumer.into();
        let bus = self.clone();
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_task = stopped.clone();

        let task = tokio::spawn(async move {
            while !stopped_task.load(Ordering::Relaxed) {
                let batch = bus.poll_batch(&stream, &group, batch_size);
                if batch.is_empty() {
                    tokio::time::sleep(block).await;
                    continue;
                }
                for message in batch {
                    let id = message.id;
                    match handler(message).await {
                        Ok(()) => bus.ack(&stream, &group, id),
                        Err(err) => warn!(
                            stream = %stream,
                            group = %group,
                            consumer = %consumer,
                            id,
                            error = %err,
                            "consumer handler failed; message left pending for redelivery"
                        ),
                    }
                }
            }
            debug!(stream = %stream, group = %group, consumer = %consumer, "consumer loop stopped");
        });

        ConsumerHandle { stopped, task }
    }
}

/// Handle to a running consumer loop. Dropping it does not stop the task;
/// call [`ConsumerHandle::stop`] and optionally await [`ConsumerHandle::join`]
/// for cooperative shutdown (spec §5).
pub struct ConsumerHandle {
    stopped: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub async fn join(self) {
        if let Err(err) = self.task.await {
            error!(error = %err, "consumer task panicked");
        }
    }
}
