// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel sessions: connecting stored channels at startup and the
//! `zapdesk channel` subcommands.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zapdesk_config::model::ZapdeskConfig;
use zapdesk_core::models::Channel;
use zapdesk_core::types::{ChannelId, ChannelKind, SessionStatus, TenantId};
use zapdesk_core::{Adapter, StorageAdapter, ZapdeskError};
use zapdesk_storage::SqliteStorage;
use zapdesk_storage::queries::catalog::{self, NewChannel};
use zapdesk_whatsapp::{BridgeClient, ChannelEvent, CloudApiClient, Session, SessionRegistry};

/// Opens a session for every enabled channel.
///
/// Business API channels are registered as-is; their events arrive through
/// the gateway's webhook. Socket channels start a bridge loop that feeds
/// `events`. A channel that fails to connect is logged and skipped.
pub async fn connect_all(
    storage: &dyn StorageAdapter,
    registry: &SessionRegistry,
    config: &ZapdeskConfig,
    events: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>, ZapdeskError> {
    let mut tasks = Vec::new();
    for channel in storage.list_channels().await? {
        if !channel.enabled {
            continue;
        }
        match connect(&channel, registry, config, events, cancel) {
            Ok(task) => tasks.extend(task),
            Err(e) => warn!(
                channel_id = channel.id,
                tenant_id = channel.tenant_id,
                error = %e,
                "channel not connected"
            ),
        }
    }
    info!(sessions = registry.len(), "channel sessions opened");
    Ok(tasks)
}

fn connect(
    channel: &Channel,
    registry: &SessionRegistry,
    config: &ZapdeskConfig,
    events: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) -> Result<Option<JoinHandle<()>>, ZapdeskError> {
    match channel.kind {
        ChannelKind::BusinessApi => {
            let client = CloudApiClient::new(channel, &config.whatsapp)?;
            registry.add(Session {
                channel_id: channel.id,
                tenant_id: channel.tenant_id,
                kind: ChannelKind::BusinessApi,
                client: Arc::new(client),
                status: channel.status,
            });
            Ok(None)
        }
        ChannelKind::Socket => {
            let client = Arc::new(BridgeClient::new(channel.id, &config.whatsapp)?);
            let task = client.spawn(events.clone(), cancel.child_token());
            // the bridge reports CONNECTED once its handshake completes
            registry.add(Session {
                channel_id: channel.id,
                tenant_id: channel.tenant_id,
                kind: ChannelKind::Socket,
                client,
                status: SessionStatus::Disconnected,
            });
            Ok(Some(task))
        }
    }
}

/// Closes every registered session.
pub async fn shutdown_all(registry: &SessionRegistry) {
    for channel_id in registry.all_channels() {
        if let Some(client) = registry.get(channel_id) {
            if let Err(e) = client.shutdown().await {
                warn!(channel_id, error = %e, "channel shutdown failed");
            }
        }
        registry.remove(channel_id);
    }
}

pub fn parse_kind(value: &str) -> Result<ChannelKind, String> {
    ChannelKind::from_str(value)
        .map_err(|_| format!("unknown channel kind `{value}` (expected socket or business_api)"))
}

/// Arguments of `zapdesk channel add`.
#[derive(Debug, Clone)]
pub struct AddChannel {
    pub tenant_id: TenantId,
    pub name: String,
    pub kind: ChannelKind,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub verify_token: Option<String>,
}

pub async fn add_channel(storage: &SqliteStorage, args: AddChannel) -> Result<ChannelId, ZapdeskError> {
    if args.kind == ChannelKind::BusinessApi
        && (args.access_token.is_none() || args.phone_number_id.is_none())
    {
        return Err(ZapdeskError::Validation(
            "business_api channels need --access-token and --phone-number-id".into(),
        ));
    }
    let mut channel = NewChannel::new(args.tenant_id, args.name, args.kind);
    channel.access_token = args.access_token;
    channel.phone_number_id = args.phone_number_id;
    channel.verify_token = args.verify_token;
    catalog::insert_channel(storage.database()?, &channel).await
}

/// One line per channel for `zapdesk channel list`.
pub async fn list_channels(storage: &dyn StorageAdapter) -> Result<Vec<String>, ZapdeskError> {
    Ok(storage
        .list_channels()
        .await?
        .into_iter()
        .map(|c| {
            format!(
                "{:>4}  tenant={:<4} {:<12} {:<12} {}{}",
                c.id,
                c.tenant_id,
                c.kind,
                c.status,
                c.name,
                if c.enabled { "" } else { " (disabled)" }
            )
        })
        .collect())
}
