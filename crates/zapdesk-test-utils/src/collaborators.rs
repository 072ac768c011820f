// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted stand-ins for the flow engine, assistant, prompt bot,
//! integrations and rule engine.
//!
//! One [`ScriptedCollaborators`] implements every handler trait. Tests flip
//! the answers it gives and read back which handlers were called.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use zapdesk_core::models::Ticket;
use zapdesk_core::{
    AssistantHandler, DispatchRequest, FlowEngine, IntegrationHandler, PromptHandler,
    PromptOutcome, RuleEngine, ZapdeskError,
};
use zapdesk_pipeline::Collaborators;

#[derive(Default)]
pub struct ScriptedCollaborators {
    /// Flow `start` returns an execution id and `process_step` reports handled.
    pub flow_handles: AtomicBool,
    pub assistant_handles: AtomicBool,
    pub prompt_handles: AtomicBool,
    pub prompt_closes: AtomicBool,
    pub integration_handles: AtomicBool,
    calls: Mutex<Vec<String>>,
    executions: AtomicUsize,
}

impl ScriptedCollaborators {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wires this instance into every collaborator slot.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            flows: self.clone(),
            assistant: self.clone(),
            prompts: self.clone(),
            integrations: self.clone(),
            rules: self.clone(),
        }
    }

    /// Calls received so far, e.g. `flow.start:3` or `rules:hello`.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl FlowEngine for ScriptedCollaborators {
    async fn start(
        &self,
        flow_id: i64,
        _req: &DispatchRequest,
    ) -> Result<Option<String>, ZapdeskError> {
        self.record(format!("flow.start:{flow_id}")).await;
        if !self.flow_handles.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let n = self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("exec-{n}")))
    }

    async fn process_step(
        &self,
        execution_id: &str,
        _req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError> {
        self.record(format!("flow.step:{execution_id}")).await;
        Ok(self.flow_handles.load(Ordering::SeqCst))
    }

    async fn finish(&self, execution_id: &str) -> Result<(), ZapdeskError> {
        self.record(format!("flow.finish:{execution_id}")).await;
        Ok(())
    }

    async fn finish_for_contact(
        &self,
        _tenant_id: i64,
        contact_id: i64,
    ) -> Result<usize, ZapdeskError> {
        self.record(format!("flow.finish_contact:{contact_id}")).await;
        Ok(0)
    }
}

#[async_trait]
impl AssistantHandler for ScriptedCollaborators {
    async fn handle(&self, req: &DispatchRequest) -> Result<bool, ZapdeskError> {
        self.record(format!("assistant:{}", req.ticket.id)).await;
        Ok(self.assistant_handles.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl PromptHandler for ScriptedCollaborators {
    async fn handle(&self, req: &DispatchRequest) -> Result<PromptOutcome, ZapdeskError> {
        self.record(format!("prompt:{}", req.ticket.id)).await;
        Ok(PromptOutcome {
            handled: self.prompt_handles.load(Ordering::SeqCst),
            closed: self.prompt_closes.load(Ordering::SeqCst),
        })
    }
}

#[async_trait]
impl IntegrationHandler for ScriptedCollaborators {
    async fn handle(
        &self,
        integration_id: i64,
        _req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError> {
        self.record(format!("integration:{integration_id}")).await;
        Ok(self.integration_handles.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl RuleEngine for ScriptedCollaborators {
    async fn process(&self, body: &str, _ticket: &Ticket) -> Result<(), ZapdeskError> {
        self.record(format!("rules:{body}")).await;
        Ok(())
    }
}
