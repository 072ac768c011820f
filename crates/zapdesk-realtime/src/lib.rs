// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime fan-out for operator UIs.
//!
//! Pipeline code publishes [`zapdesk_core::RealtimeEvent`]s to the
//! [`EventBatcher`], which coalesces them per room and hands envelopes to the
//! [`SocketHub`]. The hub looks up room members in the [`MemoryManager`] and
//! writes to each socket admitted by the [`ConnectionPool`].

pub mod batcher;
pub mod hub;
pub mod memory;
pub mod metrics;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use zapdesk_config::model::{BatcherConfig, MemoryConfig, PoolConfig};
use zapdesk_core::{HeapProbe, RoomOwners, SharedClock};

pub use batcher::{Emitter, Envelope, EventBatcher, compress_payload};
pub use hub::SocketHub;
pub use memory::MemoryManager;
pub use metrics::PerformanceMetrics;
pub use pool::{ConnectionPool, SocketId};

/// The assembled realtime layer.
#[derive(Clone)]
pub struct Realtime {
    pub hub: Arc<SocketHub>,
    pub batcher: EventBatcher,
    pool_sweep: Duration,
}

impl Realtime {
    pub fn new(
        pool: PoolConfig,
        batcher: BatcherConfig,
        memory: MemoryConfig,
        clock: SharedClock,
        heap: Arc<dyn HeapProbe>,
        owners: Arc<dyn RoomOwners>,
    ) -> Self {
        let pool_sweep = Duration::from_secs(pool.sweep_interval_secs);
        let pool = Arc::new(ConnectionPool::new(pool, clock.clone()));
        let memory = Arc::new(MemoryManager::new(memory, clock, heap));
        let hub = Arc::new(SocketHub::new(pool, memory, owners));
        let batcher = EventBatcher::new(batcher, hub.clone());
        Self {
            hub,
            batcher,
            pool_sweep,
        }
    }

    /// Starts the fallback flusher, the pool sweep and the memory tasks.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let hub = Arc::clone(&self.hub);
        vec![
            self.batcher.spawn_fallback(cancel.child_token()),
            self.hub.spawn_pool_sweep(self.pool_sweep, cancel.child_token()),
            self.hub
                .memory()
                .spawn_tasks(move |id| hub.is_live(id), cancel.child_token()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;
    use zapdesk_core::traits::NoHeapProbe;
    use zapdesk_core::{EventPublisher, ManualClock, Priority, RealtimeEvent, rooms};

    #[tokio::test(start_paused = true)]
    async fn published_events_reach_joined_sockets() {
        let realtime = Realtime::new(
            PoolConfig::default(),
            BatcherConfig::default(),
            MemoryConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(NoHeapProbe),
            Arc::new(crate::hub::tests::FixedOwners::default()),
        );
        let (tx, mut rx) = mpsc::channel(8);
        realtime.hub.register("sock", 3, 7, tx).unwrap();
        realtime.hub.join("sock", "tenant-3-pending").await.unwrap();

        realtime
            .batcher
            .publish(RealtimeEvent::new(
                rooms::tenant_status(3, zapdesk_core::types::TicketStatus::Pending),
                "ticket",
                json!({"action": "update", "ticket": {"id": 1}}),
                Priority::Medium,
            ))
            .await;

        let text = rx.recv().await.unwrap();
        let env: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(env.event, "ticket");
        assert_eq!(env.data["action"], "update");
    }
}
