// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel client for deterministic testing.
//!
//! `MockChannel` implements `ChannelClient`, captures outbound messages for
//! assertions and lets tests script probe results and send latency.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use zapdesk_core::types::{
    AdapterType, ChannelKind, ChannelProbe, DirectoryContact, GroupMetadata, HealthStatus,
    MediaLocation, MediaRef, MessageId, OutboundContent, OutboundMessage, SessionStatus,
};
use zapdesk_core::{Adapter, ChannelClient, ZapdeskError};

/// A mock WhatsApp session for testing.
pub struct MockChannel {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    probe: Arc<Mutex<Result<SessionStatus, i64>>>,
    directory: Arc<Mutex<Vec<DirectoryContact>>>,
    send_delay: Mutex<Option<Duration>>,
    counter: AtomicUsize,
}

impl MockChannel {
    /// Create a connected mock channel with nothing sent.
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            probe: Arc::new(Mutex::new(Ok(SessionStatus::Connected))),
            directory: Arc::new(Mutex::new(Vec::new())),
            send_delay: Mutex::new(None),
            counter: AtomicUsize::new(0),
        }
    }

    /// All messages passed to `send()`.
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    /// Bodies of the text messages sent, in order.
    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|m| match &m.content {
                OutboundContent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn clear_sent(&self) {
        self.sent.lock().await.clear();
    }

    /// Next probes report `status`.
    pub async fn set_probe_status(&self, status: SessionStatus) {
        *self.probe.lock().await = Ok(status);
    }

    /// Next probes fail with a provider error `code`.
    pub async fn fail_probes_with(&self, code: i64) {
        *self.probe.lock().await = Err(code);
    }

    pub async fn set_directory(&self, contacts: Vec<DirectoryContact>) {
        *self.directory.lock().await = contacts;
    }

    /// Makes every send sleep first, widening race windows in concurrency tests.
    pub async fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().await = Some(delay);
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockChannel {
    fn name(&self) -> &str {
        "mock-channel"
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
impl ChannelClient for MockChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::BusinessApi
    }

    async fn send(&self, msg: OutboundMessage) -> Result<MessageId, ZapdeskError> {
        let delay = *self.send_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().await.push(msg);
        Ok(MessageId(format!("mock-out-{n}")))
    }

    async fn probe(&self) -> Result<ChannelProbe, ZapdeskError> {
        match *self.probe.lock().await {
            Ok(status) => Ok(ChannelProbe {
                status,
                detail: None,
            }),
            Err(code) => Err(ZapdeskError::ChannelAuth {
                code,
                message: "mock probe failure".into(),
            }),
        }
    }

    async fn media_location(&self, media: &MediaRef) -> Result<MediaLocation, ZapdeskError> {
        Err(ZapdeskError::channel(format!(
            "mock channel has no media {}",
            media.reference
        )))
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, ZapdeskError> {
        Ok(GroupMetadata {
            id: group_id.to_string(),
            subject: format!("Grupo {group_id}"),
            participants: Vec::new(),
        })
    }

    async fn directory_contacts(&self) -> Result<Vec<DirectoryContact>, ZapdeskError> {
        Ok(self.directory.lock().await.clone())
    }
}
