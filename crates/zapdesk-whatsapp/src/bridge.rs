// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the socket-protocol bridge.
//!
//! The bridge is an external process that holds the multi-device session and
//! speaks a small JSON protocol over a WebSocket:
//!
//! - requests `{"id", "method", "params"}`,
//! - responses `{"id", "ok", "result", "error"}`,
//! - events `{"event", "data"}` carrying raw socket payloads.
//!
//! Events are normalized with [`crate::normalize::socket::parse_event`] and
//! forwarded as [`ChannelEvent`]s. The connection is re-established with
//! exponential backoff until cancelled or until the bridge reports that the
//! session was logged out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use zapdesk_config::model::WhatsAppConfig;
use zapdesk_core::error::is_fatal_auth_code;
use zapdesk_core::types::{
    AdapterType, ChannelId, ChannelKind, ChannelProbe, DirectoryContact, GroupMetadata,
    HealthStatus, MediaLocation, MediaRef, MessageId, OutboundContent, OutboundMessage,
    SessionStatus, WireEvent, normalize_number,
};
use zapdesk_core::{Adapter, ChannelClient, ZapdeskError};

use crate::ChannelEvent;
use crate::interactive;
use crate::normalize::socket::parse_event;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const OUTGOING_CAPACITY: usize = 256;

/// Numbers longer than this are group ids.
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Response {
        id: String,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<BridgeError>,
    },
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct BridgeError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

type Reply = Result<Value, ZapdeskError>;

/// How a single bridge connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Closed,
    LoggedOut,
}

pub struct BridgeClient {
    channel_id: ChannelId,
    url: String,
    media_dir: PathBuf,
    request_timeout: Duration,
    max_backoff: Duration,
    connected: AtomicBool,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    outgoing_tx: mpsc::Sender<String>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("channel_id", &self.channel_id)
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    pub fn new(channel_id: ChannelId, config: &WhatsAppConfig) -> Result<Self, ZapdeskError> {
        let url = config
            .bridge_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ZapdeskError::Config("whatsapp.bridge_url is not set".into()))?;
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        Ok(Self {
            channel_id,
            url,
            media_dir: PathBuf::from(&config.media_dir),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_backoff: Duration::from_secs(config.reconnect_max_backoff_secs.max(1)),
            connected: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Spawns the connection loop on the current runtime.
    pub fn spawn(
        self: &Arc<Self>,
        events: mpsc::Sender<ChannelEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.run(events, cancel).await })
    }

    /// Connects, pumps frames and reconnects until cancelled or logged out.
    pub async fn run(self: Arc<Self>, events: mpsc::Sender<ChannelEvent>, cancel: CancellationToken) {
        let Some(mut outgoing) = self.outgoing_rx.lock().take() else {
            warn!(channel_id = self.channel_id, "bridge loop already running");
            return;
        };

        let mut backoff = INITIAL_BACKOFF;
        loop {
            let end = self.session(&mut outgoing, &events, &cancel).await;
            self.connected.store(false, Ordering::Release);
            self.fail_pending();

            match end {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::LoggedOut) => {
                    info!(channel_id = self.channel_id, "bridge session logged out, not reconnecting");
                    break;
                }
                Ok(SessionEnd::Closed) => {
                    backoff = INITIAL_BACKOFF;
                    let _ = events
                        .send((self.channel_id, WireEvent::Connection(SessionStatus::Disconnected)))
                        .await;
                }
                Err(e) => {
                    warn!(channel_id = self.channel_id, error = %e, "bridge connection failed");
                }
            }

            debug!(channel_id = self.channel_id, backoff_ms = backoff.as_millis() as u64, "reconnecting to bridge");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }
        debug!(channel_id = self.channel_id, "bridge loop stopped");
    }

    async fn session(
        &self,
        outgoing: &mut mpsc::Receiver<String>,
        events: &mpsc::Sender<ChannelEvent>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, ZapdeskError> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}session={}", self.url, self.channel_id);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ZapdeskError::Channel {
                message: format!("failed to connect to bridge: {e}"),
                source: Some(Box::new(e)),
            })?;
        let (mut sink, mut stream) = ws.split();
        self.connected.store(true, Ordering::Release);
        info!(channel_id = self.channel_id, "bridge connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }
                Some(frame) = outgoing.recv() => {
                    sink.send(Message::text(frame)).await.map_err(|e| ZapdeskError::Channel {
                        message: format!("bridge write failed: {e}"),
                        source: Some(Box::new(e)),
                    })?;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if self.handle_frame(text.as_str(), events).await {
                            return Ok(SessionEnd::LoggedOut);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(ZapdeskError::Channel {
                            message: format!("bridge read failed: {e}"),
                            source: Some(Box::new(e)),
                        });
                    }
                }
            }
        }
    }

    /// Routes one text frame. Returns true when the session was logged out.
    async fn handle_frame(&self, text: &str, events: &mpsc::Sender<ChannelEvent>) -> bool {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel_id = self.channel_id, error = %e, "malformed bridge frame");
                return false;
            }
        };

        match frame {
            Frame::Response { id, ok, result, error } => {
                let reply = if ok {
                    Ok(result)
                } else {
                    Err(bridge_error(error.unwrap_or(BridgeError {
                        code: None,
                        message: "bridge request failed".into(),
                    })))
                };
                match self.pending.lock().remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!(channel_id = self.channel_id, id, "late bridge response"),
                }
                false
            }
            Frame::Event { event, data } => {
                let mut logged_out = false;
                for wire in parse_event(&event, &data) {
                    if let WireEvent::ChannelError { code, .. } = &wire {
                        logged_out |= is_fatal_auth_code(*code);
                    }
                    if events.send((self.channel_id, wire)).await.is_err() {
                        warn!(channel_id = self.channel_id, "event receiver dropped");
                        break;
                    }
                }
                logged_out
            }
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(ZapdeskError::ChannelOffline {
                channel_id: self.channel_id,
            }));
        }
    }

    /// Sends a request and waits for its correlated response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ZapdeskError> {
        if !self.is_connected() {
            return Err(ZapdeskError::ChannelOffline {
                channel_id: self.channel_id,
            });
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        if self.outgoing_tx.send(frame).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(ZapdeskError::ChannelOffline {
                channel_id: self.channel_id,
            });
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ZapdeskError::ChannelOffline {
                channel_id: self.channel_id,
            }),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ZapdeskError::Timeout {
                    duration: self.request_timeout,
                })
            }
        }
    }

    fn send_params(&self, msg: &OutboundMessage) -> Value {
        let mut params = json!({ "to": jid(&msg.to) });
        match &msg.content {
            OutboundContent::Text(text) => params["text"] = json!(text),
            OutboundContent::Media { media, caption } => {
                params["media"] = json!({
                    "path": self.media_dir.join(&media.path).display().to_string(),
                    "mimetype": media.mime_type,
                    "fileName": media.filename,
                });
                if let Some(caption) = caption {
                    params["caption"] = json!(caption);
                }
            }
            // Buttons are unreliable on the socket protocol; send the text rendering.
            OutboundContent::Interactive(menu) => {
                params["text"] = json!(interactive::to_plain_text(menu));
            }
        }
        if let Some(quoted) = &msg.quoted {
            params["quoted"] = json!(quoted.0);
        }
        params
    }
}

fn bridge_error(err: BridgeError) -> ZapdeskError {
    match err.code {
        Some(code) if is_fatal_auth_code(code) => ZapdeskError::ChannelAuth {
            code,
            message: err.message,
        },
        _ => ZapdeskError::channel(format!("bridge: {}", err.message)),
    }
}

/// Socket address for a digits-only number or group id.
pub fn jid(to: &str) -> String {
    if to.contains('@') {
        return to.to_string();
    }
    if to.len() > MAX_PHONE_DIGITS {
        format!("{to}@g.us")
    } else {
        format!("{to}@s.whatsapp.net")
    }
}

/// Maps the bridge `status` result to a probe.
fn probe_from(result: &Value) -> ChannelProbe {
    let state = result.get("state").and_then(Value::as_str).unwrap_or("close");
    let limited = result.get("limited").and_then(Value::as_bool).unwrap_or(false);
    let status = match (state, limited) {
        ("open", false) => SessionStatus::Connected,
        ("open", true) => SessionStatus::Limited,
        _ => SessionStatus::Disconnected,
    };
    ChannelProbe {
        status,
        detail: Some(format!("state={state}")),
    }
}

#[async_trait]
impl Adapter for BridgeClient {
    fn name(&self) -> &str {
        "socket-bridge"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ZapdeskError> {
        if !self.is_connected() {
            return Ok(HealthStatus::Unhealthy("bridge not connected".into()));
        }
        match self.probe().await {
            Ok(p) if p.status == SessionStatus::Connected => Ok(HealthStatus::Healthy),
            Ok(p) => Ok(HealthStatus::Degraded(p.detail.unwrap_or_default())),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), ZapdeskError> {
        self.fail_pending();
        Ok(())
    }
}

#[async_trait]
impl ChannelClient for BridgeClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    async fn send(&self, msg: OutboundMessage) -> Result<MessageId, ZapdeskError> {
        let result = self.call("sendMessage", self.send_params(&msg)).await?;
        result
            .get("id")
            .and_then(Value::as_str)
            .map(|id| MessageId(id.to_string()))
            .ok_or_else(|| ZapdeskError::channel("bridge send returned no message id"))
    }

    async fn probe(&self) -> Result<ChannelProbe, ZapdeskError> {
        if !self.is_connected() {
            return Ok(ChannelProbe {
                status: SessionStatus::Disconnected,
                detail: Some("bridge not connected".into()),
            });
        }
        let result = self.call("status", json!({})).await?;
        Ok(probe_from(&result))
    }

    async fn media_location(&self, media: &MediaRef) -> Result<MediaLocation, ZapdeskError> {
        let result = self
            .call("mediaUrl", json!({ "id": media.reference }))
            .await?;
        let url = result
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ZapdeskError::not_found("media", &media.reference))?;
        Ok(MediaLocation {
            url: url.to_string(),
            bearer: result.get("token").and_then(Value::as_str).map(str::to_string),
        })
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, ZapdeskError> {
        let result = self
            .call("groupMetadata", json!({ "jid": jid(group_id) }))
            .await?;
        Ok(GroupMetadata {
            id: normalize_number(group_id),
            subject: result
                .get("subject")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            participants: result
                .get("participants")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|p| p.get("id").and_then(Value::as_str))
                .map(normalize_number)
                .collect(),
        })
    }

    async fn directory_contacts(&self) -> Result<Vec<DirectoryContact>, ZapdeskError> {
        let result = self.call("contacts", json!({})).await?;
        Ok(result
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|c| {
                let id = c.get("id").and_then(Value::as_str)?;
                if id.ends_with("@g.us") {
                    return None;
                }
                Some(DirectoryContact {
                    number: normalize_number(id),
                    name: c
                        .get("name")
                        .or_else(|| c.get("notify"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn jid_suffixes() {
        assert_eq!(jid("5511999990000"), "5511999990000@s.whatsapp.net");
        assert_eq!(jid("120363025246125888"), "120363025246125888@g.us");
        assert_eq!(jid("x@lid"), "x@lid");
    }

    #[test]
    fn frames_are_told_apart() {
        let resp: Frame = serde_json::from_str(r#"{"id":"1","ok":true,"result":{"id":"ABC"}}"#).unwrap();
        assert!(matches!(resp, Frame::Response { ok: true, .. }));
        let ev: Frame = serde_json::from_str(r#"{"event":"connection.update","data":{"connection":"open"}}"#).unwrap();
        assert!(matches!(ev, Frame::Event { .. }));
    }

    #[test]
    fn probe_states() {
        assert_eq!(probe_from(&json!({"state": "open"})).status, SessionStatus::Connected);
        assert_eq!(probe_from(&json!({"state": "open", "limited": true})).status, SessionStatus::Limited);
        assert_eq!(probe_from(&json!({"state": "connecting"})).status, SessionStatus::Disconnected);
    }

    #[test]
    fn fatal_bridge_error_is_auth() {
        let err = bridge_error(BridgeError { code: Some(0), message: "logged out".into() });
        assert!(err.is_channel_fatal());
        let err = bridge_error(BridgeError { code: Some(500), message: "boom".into() });
        assert!(!err.is_channel_fatal());
    }

    #[tokio::test]
    async fn call_fails_fast_when_offline() {
        let config = WhatsAppConfig {
            bridge_url: Some("ws://127.0.0.1:9".into()),
            ..WhatsAppConfig::default()
        };
        let client = BridgeClient::new(3, &config).unwrap();
        let err = client.send(OutboundMessage::text("1555", "hi")).await.unwrap_err();
        assert!(matches!(err, ZapdeskError::ChannelOffline { channel_id: 3 }));
    }

    /// A fake bridge that answers `sendMessage`, then pushes one inbound message.
    async fn fake_bridge() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let req: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(req["method"], "sendMessage");
                assert_eq!(req["params"]["to"], "5511999990000@s.whatsapp.net");
                let reply = json!({"id": req["id"], "ok": true, "result": {"id": "3EB0OUT"}});
                ws.send(Message::text(reply.to_string())).await.unwrap();
                let event = json!({
                    "event": "messages.upsert",
                    "data": {"type": "notify", "messages": [{
                        "key": {"remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false, "id": "3EB0IN"},
                        "pushName": "Ana",
                        "messageTimestamp": 1700000000,
                        "message": {"conversation": "Olá"}
                    }]}
                });
                ws.send(Message::text(event.to_string())).await.unwrap();
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn round_trip_through_fake_bridge() {
        let config = WhatsAppConfig {
            bridge_url: Some(fake_bridge().await),
            ..WhatsAppConfig::default()
        };
        let client = Arc::new(BridgeClient::new(9, &config).unwrap());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = client.spawn(tx, cancel.clone());

        for _ in 0..100 {
            if client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.is_connected());

        let id = client.send(OutboundMessage::text("5511999990000", "hi")).await.unwrap();
        assert_eq!(id.0, "3EB0OUT");

        let (channel_id, event) = rx.recv().await.unwrap();
        assert_eq!(channel_id, 9);
        let WireEvent::Messages(messages) = event else {
            panic!("expected messages, got {event:?}");
        };
        assert_eq!(messages[0].body.as_deref(), Some("Olá"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
