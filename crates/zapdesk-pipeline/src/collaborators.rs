// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The handler set the router delegates to, with inert defaults.

use std::sync::Arc;

use async_trait::async_trait;

use zapdesk_core::models::Ticket;
use zapdesk_core::{
    AssistantHandler, DispatchRequest, FlowEngine, IntegrationHandler, PromptHandler,
    PromptOutcome, RuleEngine, ZapdeskError,
};

/// Handlers resolved once at startup and shared by every message.
#[derive(Clone)]
pub struct Collaborators {
    pub flows: Arc<dyn FlowEngine>,
    pub assistant: Arc<dyn AssistantHandler>,
    pub prompts: Arc<dyn PromptHandler>,
    pub integrations: Arc<dyn IntegrationHandler>,
    pub rules: Arc<dyn RuleEngine>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            flows: Arc::new(DisabledFlowEngine),
            assistant: Arc::new(DisabledAssistant),
            prompts: Arc::new(DisabledPrompts),
            integrations: Arc::new(DisabledIntegrations),
            rules: Arc::new(NoopRuleEngine),
        }
    }
}

/// Flow engine for deployments without a flow builder.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledFlowEngine;

#[async_trait]
impl FlowEngine for DisabledFlowEngine {
    async fn start(
        &self,
        _flow_id: i64,
        _req: &DispatchRequest,
    ) -> Result<Option<String>, ZapdeskError> {
        Ok(None)
    }

    async fn process_step(
        &self,
        _execution_id: &str,
        _req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError> {
        Ok(false)
    }

    async fn finish(&self, _execution_id: &str) -> Result<(), ZapdeskError> {
        Ok(())
    }

    async fn finish_for_contact(
        &self,
        _tenant_id: i64,
        _contact_id: i64,
    ) -> Result<usize, ZapdeskError> {
        Ok(0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAssistant;

#[async_trait]
impl AssistantHandler for DisabledAssistant {
    async fn handle(&self, _req: &DispatchRequest) -> Result<bool, ZapdeskError> {
        Ok(false)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPrompts;

#[async_trait]
impl PromptHandler for DisabledPrompts {
    async fn handle(&self, _req: &DispatchRequest) -> Result<PromptOutcome, ZapdeskError> {
        Ok(PromptOutcome::default())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledIntegrations;

#[async_trait]
impl IntegrationHandler for DisabledIntegrations {
    async fn handle(
        &self,
        _integration_id: i64,
        _req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError> {
        Ok(false)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRuleEngine;

#[async_trait]
impl RuleEngine for NoopRuleEngine {
    async fn process(&self, _body: &str, _ticket: &Ticket) -> Result<(), ZapdeskError> {
        Ok(())
    }
}
