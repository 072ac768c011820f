// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Socket fan-out: ties the pool, room membership and per-socket writers
//! together and delivers batched envelopes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zapdesk_core::types::{TenantId, UserId};
use zapdesk_core::rooms::{self, RoomRef};
use zapdesk_core::{RoomOwners, ZapdeskError};

use crate::batcher::{Emitter, Envelope};
use crate::memory::MemoryManager;
use crate::metrics::PerformanceMetrics;
use crate::pool::{ConnectionPool, SocketId};

pub struct SocketHub {
    pool: Arc<ConnectionPool>,
    memory: Arc<MemoryManager>,
    owners: Arc<dyn RoomOwners>,
    writers: DashMap<SocketId, mpsc::Sender<String>>,
    perf: PerformanceMetrics,
}

impl SocketHub {
    pub fn new(
        pool: Arc<ConnectionPool>,
        memory: Arc<MemoryManager>,
        owners: Arc<dyn RoomOwners>,
    ) -> Self {
        Self {
            pool,
            memory,
            owners,
            writers: DashMap::new(),
            perf: PerformanceMetrics::new(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.perf
    }

    /// Admits a socket and joins it to its tenant's main room.
    pub fn register(
        &self,
        socket_id: &str,
        tenant_id: TenantId,
        user_id: UserId,
        writer: mpsc::Sender<String>,
    ) -> Result<(), ZapdeskError> {
        self.pool.add_connection(socket_id, tenant_id, user_id)?;
        self.writers.insert(socket_id.to_string(), writer);
        self.memory.join(socket_id, &rooms::tenant_main(tenant_id));
        zapdesk_prometheus::set_ws_connections(self.pool.len());
        Ok(())
    }

    pub fn unregister(&self, socket_id: &str) {
        self.writers.remove(socket_id);
        self.memory.cleanup_socket(socket_id);
        if self.pool.remove_connection(socket_id).is_some() {
            debug!(socket_id, "socket unregistered");
        }
        zapdesk_prometheus::set_ws_connections(self.pool.len());
    }

    /// Joins a room owned by the socket's tenant. Ticket and queue rooms
    /// are resolved to their owner; unknown names and missing rows are refused.
    pub async fn join(&self, socket_id: &str, room: &str) -> Result<(), ZapdeskError> {
        let conn = self
            .pool
            .get(socket_id)
            .ok_or_else(|| ZapdeskError::not_found("socket", socket_id))?;
        let owner = match rooms::parse(room) {
            Some(RoomRef::Tenant(id)) => Some(id),
            Some(RoomRef::Ticket(id)) => self.owners.ticket_tenant(id).await?,
            Some(RoomRef::Queue(id)) => self.owners.queue_tenant(id).await?,
            None => {
                return Err(ZapdeskError::Validation(format!("unknown room {room}")));
            }
        };
        if owner != Some(conn.tenant_id) {
            warn!(socket_id, room, tenant_id = conn.tenant_id, "room join refused");
            return Err(ZapdeskError::Validation(format!(
                "room {room} belongs to another tenant"
            )));
        }
        self.pool.touch(socket_id);
        self.memory.join(socket_id, room);
        Ok(())
    }

    pub fn leave(&self, socket_id: &str, room: &str) {
        self.pool.touch(socket_id);
        self.memory.leave(socket_id, room);
    }

    pub fn touch(&self, socket_id: &str) -> bool {
        self.pool.touch(socket_id)
    }

    pub fn is_live(&self, socket_id: &str) -> bool {
        self.pool.contains(socket_id)
    }

    /// Drops sockets idle past the inactivity timeout. Dropping the writer
    /// ends the socket's send loop, which closes the connection.
    pub fn disconnect_inactive_connections(&self) -> usize {
        let stale = self.pool.take_inactive();
        for conn in &stale {
            self.writers.remove(&conn.socket_id);
            self.memory.cleanup_socket(&conn.socket_id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "disconnected inactive sockets");
            zapdesk_prometheus::set_ws_connections(self.pool.len());
        }
        stale.len()
    }

    pub fn spawn_pool_sweep(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every.max(Duration::from_secs(1)));
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        hub.disconnect_inactive_connections();
                        hub.pool.validate_integrity();
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Emitter for SocketHub {
    async fn emit(&self, room: &str, envelope: Envelope) -> Result<(), ZapdeskError> {
        let started = Instant::now();
        let text = serde_json::to_string(&envelope)
            .map_err(|e| ZapdeskError::Internal(format!("failed to encode envelope: {e}")))?;

        let members = self.memory.members(room);
        self.memory.touch_room(room);

        let mut delivered = 0usize;
        for socket_id in &members {
            let Some(writer) = self.writers.get(socket_id).map(|w| w.clone()) else {
                continue;
            };
            match writer.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(socket_id, room, error = %e, "socket writer unavailable"),
            }
        }

        if !members.is_empty() && delivered == 0 {
            self.perf.record_error();
            return Err(ZapdeskError::Internal(format!(
                "no socket in {room} accepted the event"
            )));
        }
        self.perf.record_latency(started.elapsed());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use zapdesk_core::types::{QueueId, TicketId};
    use serde_json::json;
    use zapdesk_config::model::{MemoryConfig, PoolConfig};
    use zapdesk_core::ManualClock;
    use zapdesk_core::traits::NoHeapProbe;

    /// Ownership table for tests: ticket and queue ids mapped to tenants.
    #[derive(Default)]
    pub(crate) struct FixedOwners {
        pub tickets: HashMap<TicketId, TenantId>,
        pub queues: HashMap<QueueId, TenantId>,
    }

    #[async_trait]
    impl RoomOwners for FixedOwners {
        async fn ticket_tenant(&self, id: TicketId) -> Result<Option<TenantId>, ZapdeskError> {
            Ok(self.tickets.get(&id).copied())
        }

        async fn queue_tenant(&self, id: QueueId) -> Result<Option<TenantId>, ZapdeskError> {
            Ok(self.queues.get(&id).copied())
        }
    }

    fn hub() -> (SocketHub, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pool = Arc::new(ConnectionPool::new(PoolConfig::default(), clock.clone()));
        let memory = Arc::new(MemoryManager::new(
            MemoryConfig::default(),
            clock.clone(),
            Arc::new(NoHeapProbe),
        ));
        let owners = FixedOwners {
            tickets: HashMap::from([(44, 1), (45, 2)]),
            queues: HashMap::from([(3, 1), (4, 2)]),
        };
        (SocketHub::new(pool, memory, Arc::new(owners)), clock)
    }

    fn envelope() -> Envelope {
        Envelope {
            event: "ticket".into(),
            data: json!({"action": "update"}),
            compressed: false,
        }
    }

    #[tokio::test]
    async fn emits_to_room_members_only() {
        let (hub, _) = hub();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        hub.register("a", 1, 10, tx_a).unwrap();
        hub.register("b", 2, 20, tx_b).unwrap();

        hub.emit(&rooms::tenant_main(1), envelope()).await.unwrap();
        let text = rx_a.recv().await.unwrap();
        let env: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(env.event, "ticket");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn cross_tenant_join_is_refused() {
        let (hub, _) = hub();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("a", 1, 10, tx).unwrap();
        assert!(hub.join("a", "tenant-2-open").await.is_err());
        assert!(hub.join("a", "tenant-1-open").await.is_ok());
        assert!(hub.join("missing", "ticket-44").await.is_err());
    }

    #[tokio::test]
    async fn ticket_and_queue_rooms_follow_their_owner() {
        let (hub, _) = hub();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("a", 1, 10, tx).unwrap();

        assert!(hub.join("a", "ticket-44").await.is_ok());
        assert!(hub.join("a", "queue-3-open").await.is_ok());

        assert!(hub.join("a", "ticket-45").await.is_err());
        assert!(hub.join("a", "queue-4-pending").await.is_err());
        assert!(hub.join("a", "ticket-999").await.is_err());
        assert!(hub.join("a", "lobby").await.is_err());

        assert!(hub.memory().members("ticket-44").contains(&"a".to_string()));
        assert!(hub.memory().members("ticket-45").is_empty());
    }

    #[tokio::test]
    async fn all_writers_gone_is_an_error() {
        let (hub, _) = hub();
        let (tx, rx) = mpsc::channel(1);
        hub.register("a", 1, 10, tx).unwrap();
        drop(rx);
        assert!(hub.emit(&rooms::tenant_main(1), envelope()).await.is_err());
        assert!(hub.emit("ticket-empty", envelope()).await.is_ok());
    }

    #[test]
    fn inactive_sockets_lose_rooms_and_writer() {
        let (hub, clock) = hub();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("a", 1, 10, tx).unwrap();
        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(hub.disconnect_inactive_connections(), 1);
        assert!(!hub.is_live("a"));
        assert!(hub.memory().members(&rooms::tenant_main(1)).is_empty());
    }
}
