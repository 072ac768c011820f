// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing webhook integration.
//!
//! Each configured integration receives the canonical message as JSON. The
//! endpoint answers `{"handled": bool}`; any 2xx without that field counts as
//! handled.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use zapdesk_config::model::IntegrationConfig;
use zapdesk_core::{DispatchRequest, IntegrationHandler, ZapdeskError};

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default = "handled_by_default")]
    handled: bool,
}

fn handled_by_default() -> bool {
    true
}

pub struct WebhookIntegration {
    http: reqwest::Client,
    endpoints: HashMap<i64, Endpoint>,
}

impl WebhookIntegration {
    pub fn new(configs: &[IntegrationConfig]) -> Result<Self, ZapdeskError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ZapdeskError::Internal(format!("failed to build HTTP client: {e}")))?;
        let endpoints = configs
            .iter()
            .map(|c| {
                (
                    c.id,
                    Endpoint {
                        url: c.url.clone(),
                        token: c.token.clone(),
                        timeout: Duration::from_secs(c.timeout_secs),
                    },
                )
            })
            .collect();
        Ok(Self { http, endpoints })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[async_trait]
impl IntegrationHandler for WebhookIntegration {
    async fn handle(
        &self,
        integration_id: i64,
        req: &DispatchRequest,
    ) -> Result<bool, ZapdeskError> {
        let Some(endpoint) = self.endpoints.get(&integration_id) else {
            warn!(integration_id, ticket_id = req.ticket.id, "integration is not configured");
            return Ok(false);
        };

        let payload = json!({
            "integrationId": integration_id,
            "tenantId": req.ticket.tenant_id,
            "channelId": req.channel.id,
            "ticketId": req.ticket.id,
            "contact": {
                "id": req.contact.id,
                "name": req.contact.name,
                "number": req.contact.number,
            },
            "message": req.message,
        });

        let mut request = self
            .http
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .json(&payload);
        if let Some(token) = &endpoint.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ZapdeskError::Timeout {
                    duration: endpoint.timeout,
                }
            } else {
                ZapdeskError::Internal(format!("integration {integration_id} unreachable: {e}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            warn!(integration_id, %status, "integration rejected the message");
            return Ok(false);
        }
        let text = response.text().await.unwrap_or_default();
        let handled = serde_json::from_str::<Reply>(&text)
            .map(|r| r.handled)
            .unwrap_or(true);
        debug!(integration_id, ticket_id = req.ticket.id, handled, "integration answered");
        Ok(handled)
    }
}
