// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery receipts and revocations for stored messages.

use std::sync::Arc;

use tracing::debug;

use zapdesk_core::ZapdeskError;
use zapdesk_core::types::{MessageUpdate, TenantId};

use crate::deps::PipelineDeps;
use crate::locks::KeyedLocks;
use crate::persistence::MessageStore;

/// Applies [`MessageUpdate`]s one message at a time so acks never regress.
pub struct AckApplier {
    deps: PipelineDeps,
    store: Arc<MessageStore>,
    locks: KeyedLocks<(TenantId, String)>,
}

impl AckApplier {
    pub fn new(deps: PipelineDeps, store: Arc<MessageStore>) -> Self {
        Self {
            deps,
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Returns how many stored messages changed.
    pub async fn apply(
        &self,
        tenant_id: TenantId,
        updates: &[MessageUpdate],
    ) -> Result<usize, ZapdeskError> {
        let mut changed = 0;
        for update in updates {
            if self.apply_one(tenant_id, update).await? {
                changed += 1;
            }
        }
        self.locks.prune();
        Ok(changed)
    }

    async fn apply_one(
        &self,
        tenant_id: TenantId,
        update: &MessageUpdate,
    ) -> Result<bool, ZapdeskError> {
        let id = match update {
            MessageUpdate::Ack { external_id, .. } | MessageUpdate::Revoked { external_id } => {
                external_id
            }
        };
        let _guard = self.locks.lock((tenant_id, id.0.clone())).await;
        let storage = &self.deps.storage;
        let changed = match update {
            MessageUpdate::Ack { ack, .. } => storage.update_message_ack(tenant_id, id, *ack).await?,
            MessageUpdate::Revoked { .. } => storage.mark_message_deleted(tenant_id, id).await?,
        };
        if !changed {
            debug!(tenant_id, external_id = %id, "message update ignored");
            return Ok(false);
        }
        self.store.announce_update(tenant_id, id).await?;
        Ok(true)
    }
}
