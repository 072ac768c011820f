// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic channel probes and business directory imports.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zapdesk_config::model::HealthConfig;
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::NewContact;
use zapdesk_core::types::{ChannelId, SessionStatus, normalize_number};

use crate::deps::PipelineDeps;

pub struct HealthMonitor {
    deps: PipelineDeps,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(deps: PipelineDeps, config: HealthConfig) -> Self {
        Self { deps, config }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.config.probe_timeout_secs.max(1))
    }

    /// Probes one registered channel. Returns the new status when it changed.
    ///
    /// Timeouts and transient errors leave the status alone; rejected
    /// credentials disconnect the channel.
    pub async fn probe_channel(&self, channel_id: ChannelId) -> Option<SessionStatus> {
        let session = self.deps.registry.session(channel_id)?;
        let tenant_id = session.tenant_id;
        let result = tokio::time::timeout(self.probe_timeout(), session.client.probe()).await;

        let probe = match result {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) if e.is_channel_fatal() => {
                self.deps
                    .force_disconnect(tenant_id, channel_id, &e.to_string())
                    .await;
                return Some(SessionStatus::Disconnected);
            }
            Ok(Err(e)) => {
                warn!(tenant_id, channel_id, error = %e, "channel probe failed");
                return None;
            }
            Err(_) => {
                warn!(tenant_id, channel_id, timeout = ?self.probe_timeout(), "channel probe timed out");
                return None;
            }
        };

        if probe.status == session.status {
            debug!(channel_id, status = %probe.status, "channel status unchanged");
            return None;
        }
        info!(
            tenant_id,
            channel_id,
            from = %session.status,
            to = %probe.status,
            detail = probe.detail.as_deref().unwrap_or(""),
            "channel status changed"
        );
        if let Err(e) = self
            .deps
            .set_channel_status(tenant_id, channel_id, probe.status)
            .await
        {
            warn!(channel_id, error = %e, "failed to persist channel status");
        }
        Some(probe.status)
    }

    /// Probes every registered channel; returns how many changed status.
    pub async fn probe_all(&self) -> usize {
        let mut changed = 0;
        for channel_id in self.deps.registry.all_channels() {
            if self.probe_channel(channel_id).await.is_some() {
                changed += 1;
            }
        }
        changed
    }

    /// Adds directory contacts of opted-in channels that are not known yet.
    pub async fn import_contacts(&self) -> Result<usize, ZapdeskError> {
        let mut inserted = 0;
        for channel in self.deps.storage.list_channels().await? {
            if !channel.enabled || !channel.import_contacts {
                continue;
            }
            let Some(client) = self.deps.registry.get(channel.id) else {
                continue;
            };
            let directory =
                match tokio::time::timeout(self.probe_timeout(), client.directory_contacts()).await
                {
                    Ok(Ok(entries)) => entries,
                    Ok(Err(e)) => {
                        warn!(channel_id = channel.id, error = %e, "directory listing failed");
                        continue;
                    }
                    Err(_) => {
                        warn!(channel_id = channel.id, "directory listing timed out");
                        continue;
                    }
                };

            let mut added = 0;
            for entry in directory {
                let number = normalize_number(&entry.number);
                if number.is_empty() {
                    continue;
                }
                let contact = NewContact {
                    tenant_id: channel.tenant_id,
                    name: entry.name.filter(|n| !n.is_empty()).unwrap_or_else(|| number.clone()),
                    number,
                    is_group: false,
                    channel_id: Some(channel.id),
                    profile_pic_url: None,
                };
                if self.deps.storage.insert_contact_if_absent(&contact).await? {
                    added += 1;
                }
            }
            info!(tenant_id = channel.tenant_id, channel_id = channel.id, added, "directory contacts imported");
            inserted += added;
        }
        Ok(inserted)
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let probes = {
            let monitor = Arc::clone(self);
            let cancel = cancel.clone();
            let every = Duration::from_secs(self.config.probe_interval_secs.max(1));
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            monitor.probe_all().await;
                        }
                    }
                }
            })
        };
        let imports = {
            let monitor = Arc::clone(self);
            let every = Duration::from_secs(self.config.import_interval_secs.max(1));
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            if let Err(e) = monitor.import_contacts().await {
                                warn!(error = %e, "contact import failed");
                            }
                        }
                    }
                }
            })
        };
        vec![probes, imports]
    }
}
