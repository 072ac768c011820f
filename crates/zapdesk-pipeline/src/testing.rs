// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixtures for unit tests inside this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;

use zapdesk_config::model::StorageConfig;
use zapdesk_core::models::{Channel, Contact, NewContact, NewTicket, Ticket};
use zapdesk_core::types::{
    AdapterType, ChannelKind, ChannelProbe, DirectoryContact, GroupMetadata, HealthStatus,
    InboundMessage, MediaLocation, MediaRef, MessageId, MessageType, OutboundContent,
    OutboundMessage, Sender, SessionStatus, TicketStatus,
};
use zapdesk_core::{
    Adapter, ChannelClient, EventPublisher, ManualClock, RealtimeEvent, StorageAdapter,
    ZapdeskError,
};
use zapdesk_storage::SqliteStorage;
use zapdesk_storage::queries::catalog::{self, NewChannel};
use zapdesk_whatsapp::{Session, SessionRegistry};

use crate::deps::PipelineDeps;

pub const TENANT: i64 = 1;

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<RealtimeEvent>>,
}

impl RecordingPublisher {
    pub fn rooms_for(&self, event: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .map(|e| e.room.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: RealtimeEvent) {
        self.events.lock().push(event);
    }
}

pub struct FakeClient {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub probe: Mutex<Result<SessionStatus, i64>>,
    /// Graph error code every send fails with, when set.
    pub send_error: Mutex<Option<i64>>,
    pub directory: Mutex<Vec<DirectoryContact>>,
    pub group_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            probe: Mutex::new(Ok(SessionStatus::Connected)),
            send_error: Mutex::new(None),
            directory: Mutex::new(Vec::new()),
            group_calls: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        }
    }
}

impl FakeClient {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match &m.content {
                OutboundContent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }
}

#[async_trait]
impl Adapter for FakeClient {
    fn name(&self) -> &str {
        "fake"
    }
    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }
    async fn health_check(&self) -> Result<HealthStatus, ZapdeskError> {
        Ok(HealthStatus::Healthy)
    }
    async fn shutdown(&self) -> Result<(), ZapdeskError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelClient for FakeClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::BusinessApi
    }

    async fn send(&self, msg: OutboundMessage) -> Result<MessageId, ZapdeskError> {
        if let Some(code) = *self.send_error.lock() {
            return Err(ZapdeskError::ChannelAuth {
                code,
                message: "invalid OAuth access token".into(),
            });
        }
        self.sent.lock().push(msg);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(MessageId(format!("out-{n}")))
    }

    async fn probe(&self) -> Result<ChannelProbe, ZapdeskError> {
        match *self.probe.lock() {
            Ok(status) => Ok(ChannelProbe {
                status,
                detail: None,
            }),
            Err(code) => Err(ZapdeskError::ChannelAuth {
                code,
                message: "token expired".into(),
            }),
        }
    }

    async fn media_location(&self, media: &MediaRef) -> Result<MediaLocation, ZapdeskError> {
        Err(ZapdeskError::channel(format!("no media {}", media.reference)))
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, ZapdeskError> {
        self.group_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GroupMetadata {
            id: group_id.to_string(),
            subject: "Equipe".into(),
            participants: Vec::new(),
        })
    }

    async fn directory_contacts(&self) -> Result<Vec<DirectoryContact>, ZapdeskError> {
        Ok(self.directory.lock().clone())
    }
}

pub struct Fixture {
    pub deps: PipelineDeps,
    pub storage: Arc<SqliteStorage>,
    pub publisher: Arc<RecordingPublisher>,
    pub client: Arc<FakeClient>,
    pub clock: Arc<ManualClock>,
    pub channel: Channel,
    _dir: TempDir,
}

/// Monday 2026-03-02 10:00 UTC.
pub fn monday_morning() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

pub async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

pub async fn fixture_with(customize: impl FnOnce(&mut NewChannel)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let storage = Arc::new(SqliteStorage::with_clock(
        StorageConfig {
            database_path: dir.path().join("zapdesk.db").display().to_string(),
            wal_mode: true,
        },
        clock.clone(),
    ));
    storage.initialize().await.unwrap();

    let mut new_channel = NewChannel::new(TENANT, "Recepção", ChannelKind::BusinessApi);
    customize(&mut new_channel);
    let channel_id = catalog::insert_channel(storage.database().unwrap(), &new_channel)
        .await
        .unwrap();
    let channel = storage.get_channel(channel_id).await.unwrap().unwrap();

    let client = Arc::new(FakeClient::default());
    let registry = Arc::new(SessionRegistry::new());
    registry.add(Session {
        channel_id,
        tenant_id: TENANT,
        kind: ChannelKind::BusinessApi,
        client: client.clone(),
        status: SessionStatus::Connected,
    });

    let publisher = Arc::new(RecordingPublisher::default());
    let deps = PipelineDeps::new(storage.clone(), registry, publisher.clone(), clock.clone());

    Fixture {
        deps,
        storage,
        publisher,
        client,
        clock,
        channel,
        _dir: dir,
    }
}

pub fn text_from(id: &str, number: &str, body: &str) -> InboundMessage {
    InboundMessage {
        external_id: MessageId(id.into()),
        message_type: MessageType::Conversation,
        body: Some(body.into()),
        media: None,
        from_me: false,
        is_group: false,
        edit_of: None,
        quoted_id: None,
        sender: Sender {
            number: number.into(),
            name: Some("Maria".into()),
            group_id: None,
            participant: None,
        },
        timestamp: 1_772_445_600,
        is_import: false,
        raw: serde_json::json!({ "id": id }),
    }
}

/// A pending ticket for a fresh contact, created straight in storage.
pub async fn ticket_for(fx: &Fixture, number: &str, name: &str) -> (Contact, Ticket) {
    let contact = fx
        .storage
        .upsert_contact(&NewContact {
            tenant_id: TENANT,
            name: name.into(),
            number: number.into(),
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
            unread_messages: 1,
            integration_id: None,
            use_integration: false,
            prompt_id: None,
        })
        .await
        .unwrap();
    (contact, ticket)
}
