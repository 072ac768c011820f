// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end pipeline testing.
//!
//! `TestHarness` assembles a temp SQLite database, one registered channel
//! backed by a [`MockChannel`], a recording publisher, a manual clock and a
//! [`Pipeline`]. `send_text()` drives a message through the whole pipeline.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use zapdesk_config::model::{StorageConfig, ZapdeskConfig};
use zapdesk_core::models::Ticket;
use zapdesk_core::types::{
    ChannelId, ChannelKind, InboundMessage, MessageId, MessageType, Sender, SessionStatus,
    TenantId,
};
use zapdesk_core::{ManualClock, StorageAdapter, ZapdeskError};
use zapdesk_pipeline::kv::InMemoryKv;
use zapdesk_pipeline::{Pipeline, PipelineDeps, PipelineOutcome};
use zapdesk_storage::SqliteStorage;
use zapdesk_storage::queries::catalog::{self, NewChannel, NewQueue};
use zapdesk_whatsapp::{Session, SessionRegistry};

use crate::collaborators::ScriptedCollaborators;
use crate::mock_channel::MockChannel;
use crate::publisher::RecordingPublisher;

pub const TENANT: TenantId = 1;

/// Monday 2026-03-02 10:00 UTC, where every harness clock starts.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A plain text message from `number`.
pub fn inbound_text(id: &str, number: &str, body: &str) -> InboundMessage {
    InboundMessage {
        external_id: MessageId(id.to_string()),
        message_type: MessageType::Conversation,
        body: Some(body.to_string()),
        media: None,
        from_me: false,
        is_group: false,
        edit_of: None,
        quoted_id: None,
        sender: Sender {
            number: number.to_string(),
            name: None,
            group_id: None,
            participant: None,
        },
        timestamp: start_time().timestamp(),
        is_import: false,
        raw: serde_json::json!({ "id": id, "text": { "body": body } }),
    }
}

type ChannelCustomizer = Box<dyn FnOnce(&mut NewChannel) + Send>;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: ZapdeskConfig,
    customize: Option<ChannelCustomizer>,
    collaborators: Option<Arc<ScriptedCollaborators>>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: ZapdeskConfig::default(),
            customize: None,
            collaborators: None,
        }
    }

    pub fn with_config(mut self, config: ZapdeskConfig) -> Self {
        self.config = config;
        self
    }

    /// Adjust the channel row before it is inserted.
    pub fn with_channel(mut self, customize: impl FnOnce(&mut NewChannel) + Send + 'static) -> Self {
        self.customize = Some(Box::new(customize));
        self
    }

    /// Route the pipeline's collaborators to a scripted instance.
    pub fn with_collaborators(mut self, scripted: Arc<ScriptedCollaborators>) -> Self {
        self.collaborators = Some(scripted);
        self
    }

    pub async fn build(self) -> Result<TestHarness, ZapdeskError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| ZapdeskError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };
        let clock = Arc::new(ManualClock::new(start_time()));
        let storage = Arc::new(SqliteStorage::with_clock(
            config.storage.clone(),
            clock.clone(),
        ));
        storage.initialize().await?;

        let mut new_channel = NewChannel::new(TENANT, "Atendimento", ChannelKind::BusinessApi);
        if let Some(customize) = self.customize {
            customize(&mut new_channel);
        }
        let channel_id = catalog::insert_channel(storage.database()?, &new_channel).await?;

        let channel = Arc::new(MockChannel::new());
        let registry = Arc::new(SessionRegistry::new());
        registry.add(Session {
            channel_id,
            tenant_id: new_channel.tenant_id,
            kind: ChannelKind::BusinessApi,
            client: channel.clone(),
            status: SessionStatus::Connected,
        });

        let publisher = Arc::new(RecordingPublisher::new());
        let deps = PipelineDeps::new(
            storage.clone(),
            registry.clone(),
            publisher.clone(),
            clock.clone(),
        );
        let scripted = self.collaborators.unwrap_or_else(ScriptedCollaborators::new);
        let pipeline = Arc::new(Pipeline::new(
            deps,
            &config,
            scripted.collaborators(),
            None,
            Arc::new(InMemoryKv::new()),
        ));

        Ok(TestHarness {
            pipeline,
            storage,
            registry,
            channel,
            publisher,
            clock,
            collaborators: scripted,
            channel_id,
            tenant_id: new_channel.tenant_id,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock channel and temp storage.
pub struct TestHarness {
    pub pipeline: Arc<Pipeline>,
    /// SQLite storage (temp DB, removed on drop).
    pub storage: Arc<SqliteStorage>,
    pub registry: Arc<SessionRegistry>,
    /// The mock session registered for `channel_id`.
    pub channel: Arc<MockChannel>,
    pub publisher: Arc<RecordingPublisher>,
    pub clock: Arc<ManualClock>,
    pub collaborators: Arc<ScriptedCollaborators>,
    pub channel_id: ChannelId,
    pub tenant_id: TenantId,
    pub config: ZapdeskConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default configuration and an unconfigured channel.
    pub async fn new() -> Result<Self, ZapdeskError> {
        Self::builder().build().await
    }

    /// Sends a text from `number` through the whole pipeline.
    pub async fn send_text(&self, id: &str, number: &str, body: &str) -> PipelineOutcome {
        self.pipeline
            .handle_message(self.channel_id, inbound_text(id, number, body))
            .await
    }

    pub async fn send(&self, msg: InboundMessage) -> PipelineOutcome {
        self.pipeline.handle_message(self.channel_id, msg).await
    }

    /// Adds a queue to the channel, ordered after the existing ones.
    pub async fn add_queue(&self, name: &str) -> Result<i64, ZapdeskError> {
        let order = self.storage.list_queues(self.channel_id).await?.len() as i64;
        self.add_queue_with(NewQueue::new(self.tenant_id, self.channel_id, name, order))
            .await
    }

    pub async fn add_queue_with(&self, queue: NewQueue) -> Result<i64, ZapdeskError> {
        catalog::insert_queue(self.storage.database()?, &queue).await
    }

    /// The contact's active ticket on the harness channel.
    pub async fn active_ticket(&self, number: &str) -> Result<Option<Ticket>, ZapdeskError> {
        let Some(contact) = self.storage.find_contact(self.tenant_id, number).await? else {
            return Ok(None);
        };
        self.storage
            .find_active_ticket(self.tenant_id, contact.id, self.channel_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_builds_with_a_registered_channel() {
        let harness = TestHarness::new().await.unwrap();
        assert!(harness.registry.exists(harness.channel_id));
        let channel = harness
            .storage
            .get_channel(harness.channel_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel.tenant_id, TENANT);
    }

    #[tokio::test]
    async fn send_text_stores_the_message() {
        let harness = TestHarness::new().await.unwrap();
        let outcome = harness.send_text("wamid.h1", "5511900001111", "oi").await;
        assert!(matches!(outcome, PipelineOutcome::Stored { created: true, .. }));
        assert!(harness.active_ticket("5511900001111").await.unwrap().is_some());
        assert_eq!(harness.collaborators.count("rules:oi").await, 1);
    }

    #[tokio::test]
    async fn channel_customization_is_applied() {
        let harness = TestHarness::builder()
            .with_channel(|c| c.greeting_message = Some("Bem-vindo!".into()))
            .build()
            .await
            .unwrap();
        harness.send_text("wamid.h2", "5511900002222", "oi").await;
        assert_eq!(harness.channel.sent_texts().await, vec!["Bem-vindo!".to_string()]);
    }
}
