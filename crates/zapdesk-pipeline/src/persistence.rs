// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exactly-once message persistence.
//!
//! A message id is first *claimed* in process, then checked against storage.
//! Only the holder of a claim may run the rest of the pipeline for that id,
//! and the storage insert itself ignores duplicates as a second guard.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, warn};

use zapdesk_core::models::{Channel, Contact, StoredMessage, Ticket};
use zapdesk_core::types::{Ack, InboundMessage, LocalMedia, MediaRef, MessageId, TenantId};
use zapdesk_core::{MediaStore, ZapdeskError};

use crate::deps::PipelineDeps;
use crate::events::{self, Action};

type ClaimKey = (TenantId, String);

/// Exclusive right to process one external message id.
#[derive(Debug)]
pub struct Claim {
    key: ClaimKey,
    in_flight: Arc<DashMap<ClaimKey, ()>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// A downloaded attachment and the URL operators fetch it from.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub file: LocalMedia,
    pub url: String,
}

pub struct MessageStore {
    deps: PipelineDeps,
    media: Option<Arc<dyn MediaStore>>,
    media_timeout: Duration,
    in_flight: Arc<DashMap<ClaimKey, ()>>,
}

impl MessageStore {
    pub fn new(
        deps: PipelineDeps,
        media: Option<Arc<dyn MediaStore>>,
        media_timeout: Duration,
    ) -> Self {
        Self {
            deps,
            media,
            media_timeout,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Claims `id` unless another task holds it or it is already stored.
    pub async fn claim(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<Option<Claim>, ZapdeskError> {
        let key = (tenant_id, id.0.clone());
        if self.in_flight.insert(key.clone(), ()).is_some() {
            return Ok(None);
        }
        let claim = Claim {
            key,
            in_flight: Arc::clone(&self.in_flight),
        };
        if self.deps.storage.message_exists(tenant_id, id).await? {
            return Ok(None);
        }
        Ok(Some(claim))
    }

    /// Downloads an attachment. Failures are logged and yield `None`; the
    /// message is stored without its file.
    pub async fn fetch_media(&self, channel: &Channel, media: &MediaRef) -> Option<StoredMedia> {
        let store = self.media.as_ref()?;
        let client = self.deps.registry.get(channel.id)?;
        let fetch = async {
            let location = client.media_location(media).await?;
            store.download(&location, media).await
        };
        match tokio::time::timeout(self.media_timeout, fetch).await {
            Ok(Ok(file)) => {
                let url = store.public_url(&file);
                Some(StoredMedia { file, url })
            }
            Ok(Err(e)) => {
                warn!(channel_id = channel.id, reference = %media.reference, error = %e, "media download failed");
                None
            }
            Err(_) => {
                warn!(channel_id = channel.id, reference = %media.reference, "media download timed out");
                None
            }
        }
    }

    /// Stores an inbound message, moves the ticket's last-message pointer and
    /// notifies the ticket's rooms. Returns `None` when storage already held
    /// the id.
    pub async fn persist(
        &self,
        _claim: &Claim,
        ticket: &mut Ticket,
        contact: &Contact,
        msg: &InboundMessage,
        media: Option<&StoredMedia>,
    ) -> Result<Option<StoredMessage>, ZapdeskError> {
        let body = message_body(msg, media);
        let stored = StoredMessage {
            external_id: msg.external_id.clone(),
            tenant_id: ticket.tenant_id,
            ticket_id: ticket.id,
            contact_id: Some(contact.id),
            body: body.clone(),
            from_me: msg.from_me,
            ack: if msg.from_me { Ack::Sent } else { Ack::Unknown },
            media_type: msg.media.as_ref().map(|m| m.kind.to_string()),
            media_url: media.map(|m| m.url.clone()),
            quoted_id: msg.quoted_id.clone(),
            participant: msg.sender.participant.clone(),
            is_edited: false,
            is_deleted: false,
            data_json: msg.raw.to_string(),
            created_at: sent_at(msg.timestamp).unwrap_or_else(|| self.deps.clock.now()),
        };

        if !self.deps.storage.insert_message(&stored).await? {
            error!(
                tenant_id = ticket.tenant_id,
                external_id = %msg.external_id,
                "message already stored despite claim"
            );
            return Ok(None);
        }

        self.touch_ticket(ticket, contact, &stored, preview(msg, &body))
            .await?;
        Ok(Some(stored))
    }

    /// Stores a message we sent ourselves.
    pub async fn record_outbound(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        id: MessageId,
        body: &str,
        media: Option<(&LocalMedia, String)>,
    ) -> Result<StoredMessage, ZapdeskError> {
        let stored = StoredMessage {
            external_id: id,
            tenant_id: ticket.tenant_id,
            ticket_id: ticket.id,
            contact_id: Some(contact.id),
            body: body.to_string(),
            from_me: true,
            ack: Ack::Sent,
            media_type: media.as_ref().map(|(m, _)| m.mime_type.clone()),
            media_url: media.map(|(_, url)| url),
            quoted_id: None,
            participant: None,
            is_edited: false,
            is_deleted: false,
            data_json: "{}".into(),
            created_at: self.deps.clock.now(),
        };
        if !self.deps.storage.insert_message(&stored).await? {
            return Err(ZapdeskError::Conflict(format!(
                "provider reused message id {}",
                stored.external_id
            )));
        }
        self.touch_ticket(ticket, contact, &stored, body.to_string())
            .await?;
        Ok(stored)
    }

    async fn touch_ticket(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        stored: &StoredMessage,
        last_message: String,
    ) -> Result<(), ZapdeskError> {
        ticket.last_message = Some(last_message);
        self.deps.storage.update_ticket(ticket).await?;
        let mut out = events::message_events(ticket, Some(contact), stored, Action::Create);
        out.extend(events::ticket_events(ticket, Action::Update));
        events::publish_all(self.deps.publisher.as_ref(), out).await;
        Ok(())
    }

    /// Rewrites the body of an edited message in place. Edits of messages we
    /// never stored are ignored.
    pub async fn apply_edit(
        &self,
        tenant_id: TenantId,
        msg: &InboundMessage,
    ) -> Result<bool, ZapdeskError> {
        let Some(original) = msg.edit_of.as_ref() else {
            return Ok(false);
        };
        let storage = &self.deps.storage;
        if storage.get_message(tenant_id, original).await?.is_none() {
            debug!(tenant_id, external_id = %original, "edit of unknown message ignored");
            return Ok(false);
        }
        if !storage
            .update_message_body(tenant_id, original, msg.text())
            .await?
        {
            return Ok(false);
        }
        self.announce_update(tenant_id, original).await?;
        Ok(true)
    }

    /// Emits the current state of a stored message to its ticket's rooms.
    pub async fn announce_update(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<(), ZapdeskError> {
        let storage = &self.deps.storage;
        let Some(message) = storage.get_message(tenant_id, id).await? else {
            return Ok(());
        };
        let Some(ticket) = storage.get_ticket(message.ticket_id).await? else {
            return Ok(());
        };
        events::publish_all(
            self.deps.publisher.as_ref(),
            events::message_events(&ticket, None, &message, Action::Update),
        )
        .await;
        Ok(())
    }
}

fn message_body(msg: &InboundMessage, media: Option<&StoredMedia>) -> String {
    match (msg.body.as_deref(), media) {
        (Some(body), _) if !body.is_empty() => body.to_string(),
        (_, Some(m)) => m.file.filename.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Short text shown in ticket lists.
fn preview(msg: &InboundMessage, body: &str) -> String {
    if body.is_empty() {
        format!("[{}]", msg.message_type)
    } else {
        body.to_string()
    }
}

fn sent_at(timestamp: i64) -> Option<DateTime<Utc>> {
    (timestamp > 0)
        .then(|| DateTime::from_timestamp(timestamp, 0))
        .flatten()
}
