// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact upsert and at-most-once ticket resolution.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use zapdesk_config::model::TicketConfig;
use zapdesk_core::KeyValueStore;
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{Channel, Contact, NewContact, NewTicket, Ticket, TicketTracking};
use zapdesk_core::traits::kv::unread_key;
use zapdesk_core::types::{ContactId, InboundMessage, TenantId, TicketStatus};

use crate::deps::PipelineDeps;
use crate::events::{self, Action};
use crate::locks::KeyedLocks;

/// What the pipeline needs to know about the sender of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketRequest {
    pub from_me: bool,
    pub is_import: bool,
    pub is_group: bool,
}

impl From<&InboundMessage> for TicketRequest {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            from_me: msg.from_me,
            is_import: msg.is_import,
            is_group: msg.is_group,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTicket {
    pub ticket: Ticket,
    pub created: bool,
}

pub struct Resolver {
    deps: PipelineDeps,
    kv: Arc<dyn KeyValueStore>,
    config: TicketConfig,
    ticket_locks: KeyedLocks<(TenantId, ContactId)>,
    group_subjects: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl Resolver {
    pub fn new(deps: PipelineDeps, kv: Arc<dyn KeyValueStore>, config: TicketConfig) -> Self {
        Self {
            deps,
            kv,
            config,
            ticket_locks: KeyedLocks::new(),
            group_subjects: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts the conversation's counterpart: the group for group messages,
    /// the sender otherwise.
    pub async fn resolve_contact(
        &self,
        channel: &Channel,
        msg: &InboundMessage,
    ) -> Result<Contact, ZapdeskError> {
        let contact = if msg.is_group {
            let group_id = msg
                .sender
                .group_id
                .clone()
                .unwrap_or_else(|| msg.sender.number.clone());
            let subject = self.group_subject(channel, &group_id).await;
            NewContact {
                tenant_id: channel.tenant_id,
                name: subject.unwrap_or_else(|| group_id.clone()),
                number: group_id,
                is_group: true,
                channel_id: Some(channel.id),
                profile_pic_url: None,
            }
        } else {
            // Our own push name must never overwrite the customer's name; an
            // empty name leaves a known one in place.
            let name = if msg.from_me {
                String::new()
            } else {
                msg.sender.name.clone().unwrap_or_default()
            };
            NewContact {
                tenant_id: channel.tenant_id,
                name,
                number: msg.sender.number.clone(),
                is_group: false,
                channel_id: Some(channel.id),
                profile_pic_url: None,
            }
        };

        if contact.number.is_empty() {
            return Err(ZapdeskError::Validation("message has no sender number".into()));
        }

        let mut stored = self.deps.storage.upsert_contact(&contact).await?;
        if stored.name.is_empty() {
            // First sighting of a contact through one of our own messages.
            let named = NewContact {
                name: stored.number.clone(),
                ..contact
            };
            stored = self.deps.storage.upsert_contact(&named).await?;
        }
        Ok(stored)
    }

    /// Group subject through a short-lived cache, so a burst from one group
    /// costs a single metadata call.
    async fn group_subject(&self, channel: &Channel, group_id: &str) -> Option<String> {
        let now = self.deps.clock.now();
        let ttl = Duration::seconds(self.config.group_cache_ttl_secs as i64);
        if let Some((subject, at)) = self.group_subjects.lock().get(group_id) {
            if now - *at < ttl {
                return Some(subject.clone());
            }
        }

        let client = self.deps.registry.get(channel.id)?;
        match client.group_metadata(group_id).await {
            Ok(meta) if !meta.subject.is_empty() => {
                let mut cache = self.group_subjects.lock();
                cache.retain(|_, (_, at)| now - *at < ttl);
                cache.insert(group_id.to_string(), (meta.subject.clone(), now));
                Some(meta.subject)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(channel_id = channel.id, group_id, error = %e, "group metadata unavailable");
                None
            }
        }
    }

    pub fn invalidate_group(&self, group_id: &str) {
        self.group_subjects.lock().remove(group_id);
    }

    /// Finds the contact's active ticket on the channel or creates one.
    ///
    /// The find-or-create decision runs under a per-contact lock so a burst
    /// of messages from a new contact yields a single ticket.
    pub async fn resolve_ticket(
        &self,
        contact: &Contact,
        channel: &Channel,
        request: TicketRequest,
    ) -> Result<ResolvedTicket, ZapdeskError> {
        let tenant_id = channel.tenant_id;
        let _guard = self.ticket_locks.lock((tenant_id, contact.id)).await;

        let unread = self.bump_unread(contact.id, request.from_me);
        let storage = &self.deps.storage;

        if let Some(mut ticket) = storage
            .find_active_ticket(tenant_id, contact.id, channel.id)
            .await?
        {
            ticket.unread_messages = unread;
            storage.update_ticket(&ticket).await?;
            return Ok(ResolvedTicket {
                ticket,
                created: false,
            });
        }

        let latest = storage
            .find_latest_ticket(tenant_id, contact.id, channel.id)
            .await?;

        if let Some(mut ticket) = latest {
            if request.is_import {
                // History lands on the last conversation, whatever its state.
                ticket.unread_messages = unread;
                storage.update_ticket(&ticket).await?;
                return Ok(ResolvedTicket {
                    ticket,
                    created: false,
                });
            }
            if self.should_reopen(&ticket, request) {
                ticket.status = TicketStatus::Pending;
                ticket.user_id = None;
                ticket.unread_messages = unread;
                storage.update_ticket(&ticket).await?;
                info!(ticket_id = ticket.id, contact_id = contact.id, "ticket reopened");
                events::publish_all(
                    self.deps.publisher.as_ref(),
                    events::ticket_events(&ticket, Action::Update),
                )
                .await;
                return Ok(ResolvedTicket {
                    ticket,
                    created: false,
                });
            }
        }

        let status = if request.is_import {
            TicketStatus::Closed
        } else {
            TicketStatus::Pending
        };
        let ticket = storage
            .create_ticket(&NewTicket {
                tenant_id,
                contact_id: contact.id,
                channel_id: channel.id,
                status,
                is_group: request.is_group,
                unread_messages: unread,
                integration_id: channel.integration_id,
                use_integration: channel.integration_id.is_some(),
                prompt_id: channel.prompt_id,
            })
            .await?;

        zapdesk_prometheus::record_ticket_created();
        info!(
            tenant_id,
            ticket_id = ticket.id,
            contact_id = contact.id,
            channel_id = channel.id,
            "ticket created"
        );
        events::publish_all(
            self.deps.publisher.as_ref(),
            events::ticket_events(&ticket, Action::Create),
        )
        .await;

        Ok(ResolvedTicket {
            ticket,
            created: true,
        })
    }

    fn should_reopen(&self, ticket: &Ticket, request: TicketRequest) -> bool {
        if request.is_group {
            return true;
        }
        let window = self.config.reopen_window_secs;
        window > 0
            && self.deps.clock.now() - ticket.updated_at < Duration::seconds(window as i64)
    }

    /// Outbound traffic means someone is answering: the counter resets.
    fn bump_unread(&self, contact_id: ContactId, from_me: bool) -> i64 {
        let key = unread_key(contact_id);
        if from_me {
            self.kv.set(&key, 0);
            0
        } else {
            self.kv.incr(&key)
        }
    }

    /// Get-or-create of the ticket's tracking row; always touches it.
    pub async fn resolve_tracking(&self, ticket: &Ticket) -> Result<TicketTracking, ZapdeskError> {
        self.deps.storage.create_tracking(ticket).await
    }

    pub fn prune_locks(&self) -> usize {
        self.ticket_locks.prune()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::testing::{self, TENANT};
    use std::sync::atomic::Ordering;
    use zapdesk_core::StorageAdapter;

    fn resolver(fx: &testing::Fixture, config: TicketConfig) -> (Arc<Resolver>, Arc<InMemoryKv>) {
        let kv = Arc::new(InMemoryKv::new());
        (
            Arc::new(Resolver::new(fx.deps.clone(), kv.clone(), config)),
            kv,
        )
    }

    #[tokio::test]
    async fn contact_is_upserted_not_duplicated() {
        let fx = testing::fixture().await;
        let (r, _) = resolver(&fx, TicketConfig::default());
        let msg = testing::text_from("m1", "5511988887777", "oi");
        let first = r.resolve_contact(&fx.channel, &msg).await.unwrap();
        let again = r.resolve_contact(&fx.channel, &msg).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.name, "Maria");
    }

    #[tokio::test]
    async fn own_messages_do_not_rename_contacts() {
        let fx = testing::fixture().await;
        let (r, _) = resolver(&fx, TicketConfig::default());
        let mut mine = testing::text_from("m1", "5511988887777", "olá");
        mine.from_me = true;
        mine.sender.name = Some("Loja".into());
        let created = r.resolve_contact(&fx.channel, &mine).await.unwrap();
        assert_eq!(created.name, "5511988887777");

        let theirs = testing::text_from("m2", "5511988887777", "oi");
        let named = r.resolve_contact(&fx.channel, &theirs).await.unwrap();
        assert_eq!(named.name, "Maria");
        r.resolve_contact(&fx.channel, &mine).await.unwrap();
        let contact = fx.storage.get_contact(named.id).await.unwrap().unwrap();
        assert_eq!(contact.name, "Maria");
    }

    #[tokio::test]
    async fn group_metadata_is_cached() {
        let fx = testing::fixture().await;
        let (r, _) = resolver(&fx, TicketConfig::default());
        let mut msg = testing::text_from("g1", "120363025246125244", "bom dia");
        msg.is_group = true;
        msg.sender.group_id = Some("120363025246125244".into());

        let group = r.resolve_contact(&fx.channel, &msg).await.unwrap();
        r.resolve_contact(&fx.channel, &msg).await.unwrap();
        assert!(group.is_group);
        assert_eq!(group.name, "Equipe");
        assert_eq!(fx.client.group_calls.load(Ordering::SeqCst), 1);

        r.invalidate_group("120363025246125244");
        r.resolve_contact(&fx.channel, &msg).await.unwrap();
        assert_eq!(fx.client.group_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_resolution_creates_one_ticket() {
        let fx = testing::fixture().await;
        let (r, kv) = resolver(&fx, TicketConfig::default());
        let msg = testing::text_from("m1", "5511988887777", "oi");
        let contact = r.resolve_contact(&fx.channel, &msg).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let (r, contact, channel) = (r.clone(), contact.clone(), fx.channel.clone());
            let req = TicketRequest::from(&msg);
            handles.push(tokio::spawn(async move {
                r.resolve_ticket(&contact, &channel, req).await.unwrap()
            }));
        }
        let mut created = 0;
        let mut ids = std::collections::HashSet::new();
        for h in handles {
            let resolved = h.await.unwrap();
            created += usize::from(resolved.created);
            ids.insert(resolved.ticket.id);
        }
        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
        assert_eq!(fx.storage.count_active_tickets(TENANT, contact.id).await.unwrap(), 1);
        assert_eq!(kv.get(&unread_key(contact.id)), Some(10));
    }

    #[tokio::test]
    async fn outbound_resets_unread() {
        let fx = testing::fixture().await;
        let (r, _) = resolver(&fx, TicketConfig::default());
        let msg = testing::text_from("m1", "5511988887777", "oi");
        let contact = r.resolve_contact(&fx.channel, &msg).await.unwrap();
        let inbound = TicketRequest::from(&msg);
        r.resolve_ticket(&contact, &fx.channel, inbound).await.unwrap();
        let t = r.resolve_ticket(&contact, &fx.channel, inbound).await.unwrap();
        assert_eq!(t.ticket.unread_messages, 2);

        let outbound = TicketRequest {
            from_me: true,
            ..inbound
        };
        let t = r.resolve_ticket(&contact, &fx.channel, outbound).await.unwrap();
        assert_eq!(t.ticket.unread_messages, 0);
    }

    #[tokio::test]
    async fn closed_ticket_is_replaced_unless_within_reopen_window() {
        let fx = testing::fixture().await;
        let msg = testing::text_from("m1", "5511988887777", "oi");
        let req = TicketRequest::from(&msg);

        let (r, _) = resolver(&fx, TicketConfig::default());
        let contact = r.resolve_contact(&fx.channel, &msg).await.unwrap();
        let mut first = r.resolve_ticket(&contact, &fx.channel, req).await.unwrap().ticket;
        first.status = TicketStatus::Closed;
        fx.storage.update_ticket(&first).await.unwrap();

        let second = r.resolve_ticket(&contact, &fx.channel, req).await.unwrap();
        assert!(second.created);
        assert_ne!(second.ticket.id, first.id);

        let mut closed = second.ticket.clone();
        closed.status = TicketStatus::Closed;
        fx.storage.update_ticket(&closed).await.unwrap();
        fx.clock.set(Utc::now());
        let (reopening, _) = resolver(
            &fx,
            TicketConfig {
                reopen_window_secs: 3600,
                ..TicketConfig::default()
            },
        );
        let third = reopening.resolve_ticket(&contact, &fx.channel, req).await.unwrap();
        assert!(!third.created);
        assert_eq!(third.ticket.id, closed.id);
        assert_eq!(third.ticket.status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn new_ticket_is_announced_and_tracked() {
        let fx = testing::fixture().await;
        let (r, _) = resolver(&fx, TicketConfig::default());
        let msg = testing::text_from("m1", "5511988887777", "oi");
        let contact = r.resolve_contact(&fx.channel, &msg).await.unwrap();
        let t = r
            .resolve_ticket(&contact, &fx.channel, TicketRequest::from(&msg))
            .await
            .unwrap();
        assert!(fx.publisher.rooms_for("ticket").contains(&"tenant-1-pending".to_string()));

        let a = r.resolve_tracking(&t.ticket).await.unwrap();
        let b = r.resolve_tracking(&t.ticket).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.ticket_id, t.ticket.id);
    }
}
