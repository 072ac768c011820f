// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-room event batching.
//!
//! Events for the same room are queued and flushed together. A flush groups
//! the queue by event name and emits one [`Envelope`] per name: the raw
//! payload when the group holds a single event, otherwise
//! `{"type": "batch", "events": [...]}`. Payloads above the compression
//! threshold are gzipped and base64 encoded when that saves enough bytes.
//!
//! Flush triggers:
//! - a `High` priority event, a full queue or too many queued bytes flush
//!   at once;
//! - otherwise one timer per room, rescheduled on every new event, with a
//!   delay picked by the highest priority waiting;
//! - a fallback sweep flushes any room whose oldest event is overdue.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zapdesk_config::model::BatcherConfig;
use zapdesk_core::{EventPublisher, Priority, RealtimeEvent, ZapdeskError};

const HIGH_PRIORITY_DELAY: Duration = Duration::from_millis(10);

/// What a socket receives for one flushed group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    /// The payload, or a base64 gzip string when `compressed` is set.
    pub data: Value,
    #[serde(default)]
    pub compressed: bool,
}

impl Envelope {
    /// Number of events carried.
    pub fn len(&self) -> usize {
        if self.compressed {
            return 0;
        }
        match (&self.data["type"], self.data["events"].as_array()) {
            (Value::String(t), Some(events)) if t == "batch" => events.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delivers envelopes to the sockets joined to a room.
#[async_trait]
pub trait Emitter: Send + Sync + 'static {
    async fn emit(&self, room: &str, envelope: Envelope) -> Result<(), ZapdeskError>;
}

#[derive(Debug, Clone)]
struct Queued {
    event: String,
    data: Value,
    priority: Priority,
    seq: u64,
    size: usize,
    enqueued_at: Instant,
    retries: u32,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RoomQueue {
    events: Vec<Queued>,
    bytes: usize,
    timer: Option<Timer>,
}

impl RoomQueue {
    fn top_priority(&self) -> Priority {
        self.events
            .iter()
            .map(|e| e.priority)
            .max()
            .unwrap_or(Priority::Low)
    }

    fn oldest(&self) -> Option<Instant> {
        self.events.iter().map(|e| e.enqueued_at).min()
    }
}

#[derive(Debug, Default)]
struct Stats {
    queued: AtomicU64,
    envelopes: AtomicU64,
    compressed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    pub queued: u64,
    pub envelopes: u64,
    pub compressed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub pending_rooms: usize,
}

struct Inner {
    config: BatcherConfig,
    emitter: Arc<dyn Emitter>,
    rooms: Mutex<HashMap<String, RoomQueue>>,
    seq: AtomicU64,
    timers: AtomicU64,
    stats: Stats,
}

#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<Inner>,
}

impl EventBatcher {
    pub fn new(config: BatcherConfig, emitter: Arc<dyn Emitter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                emitter,
                rooms: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                timers: AtomicU64::new(0),
                stats: Stats::default(),
            }),
        }
    }

    /// Queues one event for `room`.
    pub async fn add_event(&self, room: &str, event: &str, data: Value, priority: Priority) {
        let size = data.to_string().len();
        let queued = Queued {
            event: event.to_string(),
            data,
            priority,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            size,
            enqueued_at: Instant::now(),
            retries: 0,
        };
        self.inner.stats.queued.fetch_add(1, Ordering::Relaxed);

        let flush_now = {
            let mut rooms = self.inner.rooms.lock();
            let queue = rooms.entry(room.to_string()).or_default();
            queue.events.push(queued);
            queue.bytes += size;

            let flush_now = priority == Priority::High
                || queue.events.len() >= self.inner.config.max_batch_size
                || queue.bytes > self.inner.config.compression_threshold_bytes * 2;

            if let Some(timer) = queue.timer.take() {
                timer.handle.abort();
            }
            if !flush_now {
                let delay = self.inner.delay_for(queue.top_priority());
                queue.timer = Some(schedule_flush(&self.inner, room.to_string(), delay));
            }
            flush_now
        };

        if flush_now {
            self.inner.flush_room(room).await;
        }
    }

    /// Flushes one room now.
    pub async fn flush(&self, room: &str) {
        self.inner.flush_room(room).await;
    }

    /// Flushes every room whose oldest event waited longer than three flush
    /// intervals. Returns the number of rooms flushed.
    pub async fn flush_stale(&self) -> usize {
        let max_age = self.inner.flush_interval() * 3;
        let now = Instant::now();
        let stale: Vec<String> = self
            .inner
            .rooms
            .lock()
            .iter()
            .filter(|(_, q)| q.oldest().is_some_and(|t| now.duration_since(t) > max_age))
            .map(|(room, _)| room.clone())
            .collect();

        for room in &stale {
            debug!(room, "fallback flush");
            self.inner.flush_room(room).await;
        }
        stale.len()
    }

    /// Flushes every room regardless of age.
    pub async fn flush_all(&self) {
        let rooms: Vec<String> = self.inner.rooms.lock().keys().cloned().collect();
        for room in rooms {
            self.inner.flush_room(&room).await;
        }
    }

    /// Runs [`Self::flush_stale`] every two flush intervals until cancelled.
    pub fn spawn_fallback(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let batcher = self.clone();
        let period = self.inner.flush_interval() * 2;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        batcher.flush_stale().await;
                    }
                }
            }
            batcher.flush_all().await;
        })
    }

    pub fn stats(&self) -> BatcherStats {
        let s = &self.inner.stats;
        BatcherStats {
            queued: s.queued.load(Ordering::Relaxed),
            envelopes: s.envelopes.load(Ordering::Relaxed),
            compressed: s.compressed.load(Ordering::Relaxed),
            retried: s.retried.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            pending_rooms: self.inner.rooms.lock().len(),
        }
    }
}

#[async_trait]
impl EventPublisher for EventBatcher {
    async fn publish(&self, event: RealtimeEvent) {
        self.add_event(&event.room, &event.event, event.payload, event.priority)
            .await;
    }
}

/// A timer only flushes while it is still the room's current one; a flush
/// from any other path replaces the queue and retires it.
fn schedule_flush(inner: &Arc<Inner>, room: String, delay: Duration) -> Timer {
    let id = inner.timers.fetch_add(1, Ordering::Relaxed);
    let task = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let current = {
            let mut rooms = task.rooms.lock();
            match rooms.get_mut(&room) {
                Some(queue) if queue.timer.as_ref().is_some_and(|t| t.id == id) => {
                    queue.timer = None;
                    true
                }
                _ => false,
            }
        };
        if current {
            task.flush_room(&room).await;
        }
    });
    Timer { id, handle }
}

fn schedule_retry(inner: &Arc<Inner>, room: String, events: Vec<Queued>) {
    let inner = Arc::clone(inner);
    let backoff = Duration::from_millis(inner.config.retry_backoff_ms);
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        {
            let mut rooms = inner.rooms.lock();
            let queue = rooms.entry(room.clone()).or_default();
            queue.bytes += events.iter().map(|e| e.size).sum::<usize>();
            queue.events.splice(0..0, events);
        }
        inner.flush_room(&room).await;
    });
}

impl Inner {
    fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.config.flush_interval_ms.max(1))
    }

    fn delay_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => HIGH_PRIORITY_DELAY,
            Priority::Medium => self.flush_interval(),
            Priority::Low => self.flush_interval() * 4,
        }
    }

    async fn flush_room(self: &Arc<Self>, room: &str) {
        let mut events = {
            let mut rooms = self.rooms.lock();
            match rooms.remove(room) {
                Some(mut queue) => {
                    if let Some(timer) = queue.timer.take() {
                        timer.handle.abort();
                    }
                    queue.events
                }
                None => return,
            }
        };
        if events.is_empty() {
            return;
        }

        events.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));

        let mut groups: Vec<(String, Vec<Queued>)> = Vec::new();
        for event in events {
            match groups.iter_mut().find(|(name, _)| *name == event.event) {
                Some((_, group)) => group.push(event),
                None => groups.push((event.event.clone(), vec![event])),
            }
        }

        let mut retry = Vec::new();
        for (name, group) in groups {
            let envelope = self.envelope(&name, &group);
            let compressed = envelope.compressed;
            match self.emitter.emit(room, envelope).await {
                Ok(()) => {
                    self.stats.envelopes.fetch_add(1, Ordering::Relaxed);
                    if compressed {
                        self.stats.compressed.fetch_add(1, Ordering::Relaxed);
                    }
                    zapdesk_prometheus::record_batch(group.len(), compressed);
                }
                Err(e) => {
                    warn!(room, event = %name, error = %e, "realtime flush failed");
                    let (again, dropped): (Vec<_>, Vec<_>) = group
                        .into_iter()
                        .partition(|q| q.retries < self.config.max_retries);
                    if !dropped.is_empty() {
                        warn!(room, event = %name, count = dropped.len(), "dropping events after max retries");
                        self.stats.dropped.fetch_add(dropped.len() as u64, Ordering::Relaxed);
                        zapdesk_prometheus::record_dropped_events(dropped.len());
                    }
                    retry.extend(again.into_iter().map(|mut q| {
                        q.retries += 1;
                        q.priority = Priority::High;
                        q
                    }));
                }
            }
        }

        if !retry.is_empty() {
            self.stats.retried.fetch_add(retry.len() as u64, Ordering::Relaxed);
            schedule_retry(self, room.to_string(), retry);
        }
    }

    fn envelope(&self, name: &str, group: &[Queued]) -> Envelope {
        let data = match group {
            [single] => single.data.clone(),
            many => json!({
                "type": "batch",
                "events": many.iter().map(|q| q.data.clone()).collect::<Vec<_>>(),
            }),
        };
        let serialized = data.to_string();
        match compress_payload(
            &serialized,
            self.config.compression_threshold_bytes,
            self.config.min_compression_ratio,
        ) {
            Some(packed) => Envelope {
                event: name.to_string(),
                data: Value::String(packed),
                compressed: true,
            },
            None => Envelope {
                event: name.to_string(),
                data,
                compressed: false,
            },
        }
    }
}

/// Gzips and base64-encodes `payload` when it is larger than `threshold`
/// bytes and gzip saves at least `min_ratio` of its size.
pub fn compress_payload(payload: &str, threshold: usize, min_ratio: f64) -> Option<String> {
    if payload.len() <= threshold {
        return None;
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload.as_bytes()).ok()?;
    let packed = encoder.finish().ok()?;

    let saved = 1.0 - packed.len() as f64 / payload.len() as f64;
    if saved < min_ratio {
        return None;
    }
    Some(BASE64.encode(packed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Envelope)>>,
        failures_left: AtomicU32,
    }

    impl Recorder {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(String, Envelope)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Emitter for Recorder {
        async fn emit(&self, room: &str, envelope: Envelope) -> Result<(), ZapdeskError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ZapdeskError::Internal("socket gone".into()));
            }
            self.sent.lock().push((room.to_string(), envelope));
            Ok(())
        }
    }

    fn batcher(recorder: Arc<Recorder>) -> EventBatcher {
        EventBatcher::new(BatcherConfig::default(), recorder)
    }

    fn gunzip(b64: &str) -> String {
        let bytes = BASE64.decode(b64).unwrap();
        let mut out = String::new();
        flate2::read::GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[tokio::test(start_paused = true)]
    async fn single_event_is_emitted_unwrapped() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        b.add_event("ticket-1", "appMessage", json!({"id": 1}), Priority::Low).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rec.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = rec.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ticket-1");
        assert_eq!(sent[0].1.data, json!({"id": 1}));
        assert!(!sent[0].1.compressed);
        assert_eq!(sent[0].1.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn high_priority_flushes_whole_queue() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        for i in 0..3 {
            b.add_event("tenant-1-open", "ticket", json!({"n": i}), Priority::Low).await;
        }
        assert!(rec.sent().is_empty());
        b.add_event("tenant-1-open", "ticket", json!({"n": 3}), Priority::High).await;

        let sent = rec.sent();
        assert_eq!(sent.len(), 1);
        let env = &sent[0].1;
        assert_eq!(env.data["type"], "batch");
        let events = env.data["events"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], json!({"n": 3}));
        assert_eq!(events[1], json!({"n": 0}));
    }

    #[tokio::test(start_paused = true)]
    async fn groups_by_event_name() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        b.add_event("r", "ticket", json!(1), Priority::Medium).await;
        b.add_event("r", "appMessage", json!(2), Priority::Medium).await;
        b.add_event("r", "ticket", json!(3), Priority::Medium).await;
        b.flush("r").await;

        let sent = rec.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.event, "ticket");
        assert_eq!(sent[0].1.len(), 2);
        assert_eq!(sent[1].1.event, "appMessage");
        assert_eq!(sent[1].1.data, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn early_flush_retires_the_pending_timer() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        b.add_event("r", "e", json!(1), Priority::Low).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        b.flush("r").await;
        assert_eq!(rec.sent().len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        b.add_event("r", "e", json!(2), Priority::Low).await;
        // past the first timer's deadline, short of the second's
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rec.sent().len(), 1);

        tokio::time::sleep(Duration::from_millis(110)).await;
        let sent = rec.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1.data, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn new_event_reschedules_timer() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        b.add_event("r", "e", json!(1), Priority::Low).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        b.add_event("r", "e", json!(2), Priority::Low).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rec.sent().is_empty());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(rec.sent().len(), 1);
        assert_eq!(rec.sent()[0].1.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_flushes_immediately() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        for i in 0..50 {
            b.add_event("r", "e", json!(i), Priority::Low).await;
        }
        assert_eq!(rec.sent().len(), 1);
        assert_eq!(rec.sent()[0].1.len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn large_batches_are_compressed() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        let body = "a".repeat(900);
        b.add_event("r", "e", json!({"body": body}), Priority::Low).await;
        b.add_event("r", "e", json!({"body": body}), Priority::Low).await;
        b.add_event("r", "e", json!({"body": body}), Priority::Low).await;

        let sent = rec.sent();
        assert_eq!(sent.len(), 1, "byte ceiling forces a flush");
        let env = &sent[0].1;
        assert!(env.compressed);
        let plain: Value = serde_json::from_str(&gunzip(env.data.as_str().unwrap())).unwrap();
        assert_eq!(plain["events"].as_array().unwrap().len(), 3);
        assert_eq!(b.stats().compressed, 1);
    }

    #[test]
    fn compression_threshold_and_ratio() {
        let small = "x".repeat(500);
        assert!(compress_payload(&small, 1024, 0.2).is_none());

        let big = "hello world ".repeat(420);
        assert!(big.len() > 5000);
        assert!(compress_payload(&big, 1024, 0.2).is_some());

        // Pseudo-random digits barely compress.
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let noisy: String = (0..5000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                char::from(b'!' + (state % 90) as u8)
            })
            .collect();
        assert!(compress_payload(&noisy, 1024, 0.2).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_retried_with_backoff() {
        let rec = Arc::new(Recorder::failing(1));
        let b = batcher(rec.clone());
        b.add_event("r", "e", json!(1), Priority::High).await;
        assert!(rec.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(rec.sent().len(), 1);
        assert_eq!(b.stats().retried, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_dropped_after_max_retries() {
        let rec = Arc::new(Recorder::failing(10));
        let b = batcher(rec.clone());
        b.add_event("r", "e", json!(1), Priority::High).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rec.sent().is_empty());
        let stats = b.stats();
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending_rooms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_flushes_overdue_rooms() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        b.add_event("r", "e", json!(1), Priority::Low).await;
        assert_eq!(b.flush_stale().await, 0);

        tokio::time::advance(Duration::from_millis(160)).await;
        assert_eq!(b.flush_stale().await, 1);
        assert_eq!(rec.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publisher_feeds_batcher() {
        let rec = Arc::new(Recorder::default());
        let b = batcher(rec.clone());
        b.publish(RealtimeEvent::new("ticket-9", "ticket", json!({"action": "update"}), Priority::High))
            .await;
        assert_eq!(rec.sent()[0].0, "ticket-9");
    }
}
