// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Publishing domain events to operator UI rooms.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ZapdeskError;
use crate::types::{QueueId, TenantId, TicketId, TicketStatus};

/// Delivery priority inside the realtime batcher.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// One event addressed to one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub room: String,
    /// Event type, e.g. `appMessage`, `ticket`, `channelStatus`.
    pub event: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
}

impl RealtimeEvent {
    pub fn new(
        room: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            room: room.into(),
            event: event.into(),
            payload,
            priority,
        }
    }
}

/// Sink for realtime events. Publishing never fails the caller.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, event: RealtimeEvent);
}

/// Tells which tenant owns the ticket or queue behind a room.
#[async_trait]
pub trait RoomOwners: Send + Sync + 'static {
    async fn ticket_tenant(&self, ticket_id: TicketId) -> Result<Option<TenantId>, ZapdeskError>;
    async fn queue_tenant(&self, queue_id: QueueId) -> Result<Option<TenantId>, ZapdeskError>;
}

/// Room naming shared by the pipeline and the UI socket layer.
pub mod rooms {
    use super::*;

    pub fn tenant_status(tenant_id: TenantId, status: TicketStatus) -> String {
        format!("tenant-{tenant_id}-{status}")
    }

    pub fn ticket(ticket_id: TicketId) -> String {
        format!("ticket-{ticket_id}")
    }

    pub fn queue_status(queue_id: QueueId, status: TicketStatus) -> String {
        format!("queue-{queue_id}-{status}")
    }

    pub fn tenant_main(tenant_id: TenantId) -> String {
        format!("tenant-{tenant_id}-mainchannel")
    }

    /// What a room name addresses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RoomRef {
        Tenant(TenantId),
        Ticket(TicketId),
        Queue(QueueId),
    }

    /// Parses a room built by this module; anything else is `None`.
    pub fn parse(room: &str) -> Option<RoomRef> {
        if let Some(rest) = room.strip_prefix("tenant-") {
            let (id, suffix) = rest.split_once('-')?;
            if suffix.is_empty() {
                return None;
            }
            return id.parse().ok().map(RoomRef::Tenant);
        }
        if let Some(id) = room.strip_prefix("ticket-") {
            return id.parse().ok().map(RoomRef::Ticket);
        }
        let (id, status) = room.strip_prefix("queue-")?.split_once('-')?;
        status.parse::<TicketStatus>().ok()?;
        id.parse().ok().map(RoomRef::Queue)
    }
}
