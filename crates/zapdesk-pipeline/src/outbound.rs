// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sending bot replies and recording them on the ticket.

use std::sync::Arc;

use tracing::debug;

use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{Contact, StoredMessage, Ticket};
use zapdesk_core::types::{InteractiveMessage, OutboundContent, OutboundMessage};

use crate::deps::PipelineDeps;
use crate::persistence::MessageStore;

pub struct Outbound {
    deps: PipelineDeps,
    store: Arc<MessageStore>,
}

impl Outbound {
    pub fn new(deps: PipelineDeps, store: Arc<MessageStore>) -> Self {
        Self { deps, store }
    }

    pub async fn send_text(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        body: &str,
    ) -> Result<StoredMessage, ZapdeskError> {
        self.send(ticket, contact, OutboundContent::Text(body.to_string()))
            .await
    }

    pub async fn send_interactive(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        message: InteractiveMessage,
    ) -> Result<StoredMessage, ZapdeskError> {
        self.send(ticket, contact, OutboundContent::Interactive(message))
            .await
    }

    /// Delivers through the ticket's channel and stores the provider id so
    /// later acks find the row.
    pub async fn send(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        content: OutboundContent,
    ) -> Result<StoredMessage, ZapdeskError> {
        let client = self.deps.registry.require(ticket.channel_id)?;
        let body = match &content {
            OutboundContent::Text(text) => text.clone(),
            OutboundContent::Media { caption, .. } => caption.clone().unwrap_or_default(),
            OutboundContent::Interactive(i) => i.body.clone(),
        };
        let sent = client
            .send(OutboundMessage {
                to: contact.number.clone(),
                content,
                quoted: None,
            })
            .await;
        let id = match sent {
            Ok(id) => id,
            Err(e) => {
                if e.is_channel_fatal() {
                    self.deps
                        .force_disconnect(ticket.tenant_id, ticket.channel_id, &e.to_string())
                        .await;
                }
                return Err(e);
            }
        };
        debug!(ticket_id = ticket.id, external_id = %id, "reply sent");
        self.store
            .record_outbound(ticket, contact, id, &body, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kv::InMemoryKv;
    use crate::resolver::{Resolver, TicketRequest};
    use crate::testing::{self, TENANT};
    use zapdesk_config::model::TicketConfig;
    use zapdesk_core::StorageAdapter;
    use zapdesk_core::types::{Ack, SessionStatus};

    #[tokio::test]
    async fn replies_are_stored_as_own_messages() {
        let fx = testing::fixture().await;
        let msg = testing::text_from("wamid.1", "5511988887777", "oi");
        let resolver = Resolver::new(
            fx.deps.clone(),
            Arc::new(InMemoryKv::new()),
            TicketConfig::default(),
        );
        let contact = resolver.resolve_contact(&fx.channel, &msg).await.unwrap();
        let mut ticket = resolver
            .resolve_ticket(&contact, &fx.channel, TicketRequest::from(&msg))
            .await
            .unwrap()
            .ticket;
        let store = Arc::new(MessageStore::new(fx.deps.clone(), None, Duration::from_secs(1)));
        let out = Outbound::new(fx.deps.clone(), store);

        let stored = out.send_text(&mut ticket, &contact, "Olá!").await.unwrap();
        assert!(stored.from_me);
        assert_eq!(stored.ack, Ack::Sent);
        assert_eq!(stored.external_id.as_str(), "out-0");
        assert_eq!(fx.client.last_text(), "Olá!");
        assert_eq!(fx.client.sent.lock()[0].to, "5511988887777");

        let reloaded = fx.storage.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_message.as_deref(), Some("Olá!"));
    }

    #[tokio::test]
    async fn offline_channels_refuse_to_send() {
        let fx = testing::fixture().await;
        let msg = testing::text_from("wamid.2", "5511988887777", "oi");
        let resolver = Resolver::new(
            fx.deps.clone(),
            Arc::new(InMemoryKv::new()),
            TicketConfig::default(),
        );
        let contact = resolver.resolve_contact(&fx.channel, &msg).await.unwrap();
        let mut ticket = resolver
            .resolve_ticket(&contact, &fx.channel, TicketRequest::from(&msg))
            .await
            .unwrap()
            .ticket;
        fx.deps.registry.remove(fx.channel.id);
        let store = Arc::new(MessageStore::new(fx.deps.clone(), None, Duration::from_secs(1)));
        let out = Outbound::new(fx.deps.clone(), store);

        let err = out.send_text(&mut ticket, &contact, "Olá!").await.unwrap_err();
        assert!(matches!(err, ZapdeskError::ChannelOffline { .. }));
    }

    #[tokio::test]
    async fn rejected_token_disconnects_the_channel() {
        let fx = testing::fixture().await;
        let (contact, mut ticket) = testing::ticket_for(&fx, "5511988887777", "Maria").await;
        fx.deps
            .set_channel_status(TENANT, fx.channel.id, SessionStatus::Connected)
            .await
            .unwrap();
        *fx.client.send_error.lock() = Some(190);
        let store = Arc::new(MessageStore::new(fx.deps.clone(), None, Duration::from_secs(1)));
        let out = Outbound::new(fx.deps.clone(), store);

        let err = out.send_text(&mut ticket, &contact, "Olá!").await.unwrap_err();
        assert!(err.is_channel_fatal());
        assert!(!fx.deps.registry.exists(fx.channel.id));
        let channel = fx.storage.get_channel(fx.channel.id).await.unwrap().unwrap();
        assert_eq!(channel.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn transient_send_errors_keep_the_session() {
        let fx = testing::fixture().await;
        let (contact, mut ticket) = testing::ticket_for(&fx, "5511988887777", "Maria").await;
        *fx.client.send_error.lock() = Some(131_000);
        let store = Arc::new(MessageStore::new(fx.deps.clone(), None, Duration::from_secs(1)));
        let out = Outbound::new(fx.deps.clone(), store);

        assert!(out.send_text(&mut ticket, &contact, "Olá!").await.is_err());
        assert!(fx.deps.registry.exists(fx.channel.id));
    }
}
