// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pluggable handlers the dispatch router hands conversations to.
//!
//! Each handler returns whether it consumed the message; the router moves on
//! to the next rule when it did not.

use async_trait::async_trait;

use crate::error::ZapdeskError;
use crate::models::{Channel, Contact, Ticket};
use crate::traits::adapter::Adapter;
use crate::types::{InboundMessage, LocalMedia, MediaLocation, MediaRef};

/// Everything a handler needs to act on one inbound message.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub channel: Channel,
    pub contact: Contact,
    pub ticket: Ticket,
    pub message: InboundMessage,
}

/// Visual flow builder runtime.
#[async_trait]
pub trait FlowEngine: Send + Sync + 'static {
    /// Starts a flow and returns the execution id when one was created.
    async fn start(
        &self,
        flow_id: i64,
        req: &DispatchRequest,
    ) -> Result<Option<String>, ZapdeskError>;

    /// Advances a running execution. Returns false when it has finished.
    async fn process_step(
        &self,
        execution_id: &str,
        req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError>;

    async fn finish(&self, execution_id: &str) -> Result<(), ZapdeskError>;

    /// Finishes every execution attached to a contact; returns how many.
    async fn finish_for_contact(
        &self,
        tenant_id: i64,
        contact_id: i64,
    ) -> Result<usize, ZapdeskError>;
}

/// Generative assistant bound to a channel.
#[async_trait]
pub trait AssistantHandler: Send + Sync + 'static {
    async fn handle(&self, req: &DispatchRequest) -> Result<bool, ZapdeskError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptOutcome {
    pub handled: bool,
    /// The prompt closed the ticket.
    pub closed: bool,
}

/// Prompt-driven bot bound to a channel or a ticket.
#[async_trait]
pub trait PromptHandler: Send + Sync + 'static {
    async fn handle(&self, req: &DispatchRequest) -> Result<PromptOutcome, ZapdeskError>;
}

/// External integration (webhook, typebot, n8n style).
#[async_trait]
pub trait IntegrationHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        integration_id: i64,
        req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError>;
}

/// Tenant-defined auto-reply rules evaluated on every message.
#[async_trait]
pub trait RuleEngine: Send + Sync + 'static {
    async fn process(&self, body: &str, ticket: &Ticket) -> Result<(), ZapdeskError>;
}

/// Durable storage for downloaded attachments.
#[async_trait]
pub trait MediaStore: Adapter {
    async fn download(
        &self,
        location: &MediaLocation,
        media: &MediaRef,
    ) -> Result<LocalMedia, ZapdeskError>;

    /// Public URL the UI uses to fetch a stored file.
    fn public_url(&self, media: &LocalMedia) -> String;
}
