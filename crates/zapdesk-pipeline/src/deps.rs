// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared handles every pipeline component is built from.

use std::sync::Arc;

use tracing::{info, warn};

use zapdesk_core::types::{ChannelId, SessionStatus, TenantId};
use zapdesk_core::{EventPublisher, SharedClock, StorageAdapter, ZapdeskError};
use zapdesk_whatsapp::SessionRegistry;

use crate::events;

#[derive(Clone)]
pub struct PipelineDeps {
    pub storage: Arc<dyn StorageAdapter>,
    pub registry: Arc<SessionRegistry>,
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: SharedClock,
}

impl PipelineDeps {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        registry: Arc<SessionRegistry>,
        publisher: Arc<dyn EventPublisher>,
        clock: SharedClock,
    ) -> Self {
        Self {
            storage,
            registry,
            publisher,
            clock,
        }
    }

    /// Persists a channel status and tells the tenant's operators.
    pub async fn set_channel_status(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
        status: SessionStatus,
    ) -> Result<(), ZapdeskError> {
        self.registry.set_status(channel_id, status);
        self.storage.update_channel_status(channel_id, status).await?;
        self.publisher
            .publish(events::channel_status_event(tenant_id, channel_id, status))
            .await;
        Ok(())
    }

    /// Drops the session after an irrecoverable credential error. The channel
    /// stays disconnected until an operator reconnects it.
    pub async fn force_disconnect(&self, tenant_id: TenantId, channel_id: ChannelId, reason: &str) {
        if let Some(session) = self.registry.session(channel_id) {
            if let Err(e) = session.client.shutdown().await {
                warn!(channel_id, error = %e, "client shutdown failed");
            }
        }
        self.registry.remove(channel_id);
        warn!(tenant_id, channel_id, reason, "channel credentials rejected, disconnecting");
        if let Err(e) = self
            .set_channel_status(tenant_id, channel_id, SessionStatus::Disconnected)
            .await
        {
            warn!(channel_id, error = %e, "failed to persist disconnected status");
        } else {
            info!(channel_id, "channel marked DISCONNECTED");
        }
    }
}
