// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-through cache of scripted-conversation state.
//!
//! Storage is the source of truth; the cache only saves a round trip on the
//! next reply of the same ticket. Every save slides the expiry forward.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;

use zapdesk_core::models::ChatbotStateRecord;
use zapdesk_core::types::{TenantId, TicketId};
use zapdesk_core::{SharedClock, StorageAdapter, ZapdeskError};

pub struct ChatbotStateCache {
    storage: Arc<dyn StorageAdapter>,
    clock: SharedClock,
    ttl: Duration,
    entries: DashMap<(TenantId, TicketId), ChatbotStateRecord>,
}

impl ChatbotStateCache {
    pub fn new(storage: Arc<dyn StorageAdapter>, clock: SharedClock, ttl_secs: u64) -> Self {
        Self {
            storage,
            clock,
            ttl: Duration::seconds(ttl_secs as i64),
            entries: DashMap::new(),
        }
    }

    /// Live state of a ticket. Expired state reads as absent and is left for
    /// the sweep, which owns the inactivity notice.
    pub async fn get(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
    ) -> Result<Option<ChatbotStateRecord>, ZapdeskError> {
        let now = self.clock.now();
        let key = (tenant_id, ticket_id);
        if let Some(hit) = self.entries.get(&key).map(|e| e.clone()) {
            if hit.expires_at > now {
                return Ok(Some(hit));
            }
            self.entries.remove(&key);
            return Ok(None);
        }

        let loaded = self.storage.load_chatbot_state(tenant_id, ticket_id).await?;
        Ok(loaded.filter(|s| s.expires_at > now).inspect(|s| {
            self.entries.insert(key, s.clone());
        }))
    }

    /// Stamps `updated_at` and a fresh expiry, then writes through.
    pub async fn put(&self, mut state: ChatbotStateRecord) -> Result<ChatbotStateRecord, ZapdeskError> {
        let now = self.clock.now();
        state.updated_at = now;
        state.expires_at = now + self.ttl;
        self.storage.save_chatbot_state(&state).await?;
        self.entries
            .insert((state.tenant_id, state.ticket_id), state.clone());
        Ok(state)
    }

    pub async fn remove(&self, tenant_id: TenantId, ticket_id: TicketId) -> Result<(), ZapdeskError> {
        self.entries.remove(&(tenant_id, ticket_id));
        self.storage.delete_chatbot_state(tenant_id, ticket_id).await
    }

    /// Persisted states past their expiry. They are dropped from the cache;
    /// the caller deletes them from storage once handled.
    pub async fn expired(&self) -> Result<Vec<ChatbotStateRecord>, ZapdeskError> {
        let now = self.clock.now();
        let expired = self.storage.expired_chatbot_states(now).await?;
        for state in &expired {
            self.entries.remove(&(state.tenant_id, state.ticket_id));
        }
        self.entries.retain(|_, s| s.expires_at > now);
        Ok(expired)
    }

    pub fn cached(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, TENANT};
    use zapdesk_core::Clock;
    use zapdesk_core::models::{NewContact, NewTicket};
    use zapdesk_core::types::TicketStatus;

    async fn ticket_id(fx: &testing::Fixture) -> (i64, i64) {
        let contact = fx
            .storage
            .upsert_contact(&NewContact {
                tenant_id: TENANT,
                name: "Ana".into(),
                number: "5511900000001".into(),
                is_group: false,
                channel_id: Some(fx.channel.id),
                profile_pic_url: None,
            })
            .await
            .unwrap();
        let ticket = fx
            .storage
            .create_ticket(&NewTicket {
                tenant_id: TENANT,
                contact_id: contact.id,
                channel_id: fx.channel.id,
                status: TicketStatus::Pending,
                is_group: false,
                unread_messages: 0,
                integration_id: None,
                use_integration: false,
                prompt_id: None,
            })
            .await
            .unwrap();
        (ticket.id, contact.id)
    }

    fn record(ticket_id: i64, contact_id: i64) -> ChatbotStateRecord {
        let now = testing::monday_morning();
        ChatbotStateRecord {
            tenant_id: TENANT,
            ticket_id,
            contact_id,
            step: "MENU".into(),
            context: "{}".into(),
            expires_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_slides_expiry_and_survives_a_cold_cache() {
        let fx = testing::fixture().await;
        let (ticket, contact) = ticket_id(&fx).await;
        let cache = ChatbotStateCache::new(fx.storage.clone(), fx.clock.clone(), 300);

        let saved = cache.put(record(ticket, contact)).await.unwrap();
        assert_eq!(saved.expires_at, fx.clock.now() + Duration::seconds(300));
        assert_eq!(cache.cached(), 1);

        let cold = ChatbotStateCache::new(fx.storage.clone(), fx.clock.clone(), 300);
        let loaded = cold.get(TENANT, ticket).await.unwrap().unwrap();
        assert_eq!(loaded.step, "MENU");
        assert_eq!(cold.cached(), 1);
    }

    #[tokio::test]
    async fn expired_state_reads_as_absent_until_swept() {
        let fx = testing::fixture().await;
        let (ticket, contact) = ticket_id(&fx).await;
        let cache = ChatbotStateCache::new(fx.storage.clone(), fx.clock.clone(), 300);
        cache.put(record(ticket, contact)).await.unwrap();

        fx.clock.advance(Duration::seconds(301));
        assert!(cache.get(TENANT, ticket).await.unwrap().is_none());

        let expired = cache.expired().await.unwrap();
        assert_eq!(expired.len(), 1);
        cache.remove(TENANT, ticket).await.unwrap();
        assert!(cache.expired().await.unwrap().is_empty());
    }
}
