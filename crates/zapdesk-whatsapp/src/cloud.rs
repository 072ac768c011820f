// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the hosted Business API (Graph API).
//!
//! One [`CloudApiClient`] per channel. Inbound traffic does not come
//! through here; it arrives as webhooks handled by the gateway.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use tracing::{debug, warn};

use zapdesk_config::model::WhatsAppConfig;
use zapdesk_core::error::is_fatal_auth_code;
use zapdesk_core::models::Channel;
use zapdesk_core::types::{
    AdapterType, ChannelId, ChannelKind, ChannelProbe, DirectoryContact, HealthStatus,
    LocalMedia, MediaLocation, MediaRef, MessageId, OutboundContent, OutboundMessage,
    SessionStatus, normalize_number,
};
use zapdesk_core::{Adapter, ChannelClient, ZapdeskError};

use crate::interactive;

/// Upper bound on directory pages fetched by one import.
const MAX_DIRECTORY_PAGES: usize = 50;

#[derive(Debug, Clone)]
pub struct CloudApiClient {
    http: reqwest::Client,
    channel_id: ChannelId,
    /// `{graph_api_base}/{graph_api_version}`.
    base_url: String,
    phone_number_id: String,
    business_account_id: Option<String>,
    access_token: String,
    media_dir: PathBuf,
}

impl CloudApiClient {
    /// Builds a client for a Business API channel.
    ///
    /// Requires `access_token` and `phone_number_id` on the channel.
    pub fn new(channel: &Channel, config: &WhatsAppConfig) -> Result<Self, ZapdeskError> {
        let access_token = channel
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ZapdeskError::Config(format!("channel {} has no access token", channel.id))
            })?;
        let phone_number_id = channel
            .phone_number_id
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ZapdeskError::Config(format!("channel {} has no phone number id", channel.id))
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|e| {
                ZapdeskError::Config(format!("invalid access token header value: {e}"))
            })?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ZapdeskError::Channel {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            http,
            channel_id: channel.id,
            base_url: format!(
                "{}/{}",
                config.graph_api_base.trim_end_matches('/'),
                config.graph_api_version
            ),
            phone_number_id,
            business_account_id: channel.business_account_id.clone(),
            access_token,
            media_dir: PathBuf::from(&config.media_dir),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json(&self, url: &str) -> Result<Value, ZapdeskError> {
        let resp = self.http.get(url).send().await.map_err(transport_error)?;
        read_response(resp).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ZapdeskError> {
        debug!(channel_id = self.channel_id, path, "business api POST");
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(resp).await
    }

    /// Builds the JSON body of a `/messages` request. Media must already be
    /// uploaded; `media_id` carries the provider's id for it.
    fn message_body(&self, msg: &OutboundMessage, media_id: Option<&str>) -> Value {
        let mut body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": msg.to,
        });

        match &msg.content {
            OutboundContent::Text(text) => {
                body["type"] = json!("text");
                body["text"] = json!({ "preview_url": false, "body": text });
            }
            OutboundContent::Media { media, caption } => {
                let kind = media_type_for(&media.mime_type);
                let mut part = json!({ "id": media_id.unwrap_or_default() });
                // Audio and stickers reject captions.
                if let Some(caption) = caption.as_deref().filter(|_| kind != "audio" && kind != "sticker") {
                    part["caption"] = json!(caption);
                }
                if kind == "document" {
                    if let Some(name) = &media.filename {
                        part["filename"] = json!(name);
                    }
                }
                body["type"] = json!(kind);
                body[kind] = part;
            }
            OutboundContent::Interactive(interactive_msg) => {
                body["type"] = json!("interactive");
                body["interactive"] = interactive::to_graph_json(interactive_msg);
            }
        }

        if let Some(quoted) = &msg.quoted {
            body["context"] = json!({ "message_id": quoted.0 });
        }
        body
    }
}

fn transport_error(e: reqwest::Error) -> ZapdeskError {
    ZapdeskError::Channel {
        message: format!("business api request failed: {e}"),
        source: Some(Box::new(e)),
    }
}

async fn read_response(resp: reqwest::Response) -> Result<Value, ZapdeskError> {
    let status = resp.status();
    let text = resp.text().await.map_err(transport_error)?;
    if status.is_success() {
        return serde_json::from_str(&text).map_err(|e| ZapdeskError::Channel {
            message: format!("failed to parse business api response: {e}"),
            source: Some(Box::new(e)),
        });
    }
    Err(api_error(status.as_u16(), &text))
}

/// Maps a Graph API error body. Codes 0 and 190, or an HTTP 401 without a
/// code, mean the channel credentials are gone.
pub fn api_error(status: u16, body: &str) -> ZapdeskError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}: {body}"));

    match code {
        Some(code) if is_fatal_auth_code(code) => ZapdeskError::ChannelAuth { code, message },
        None if status == 401 => ZapdeskError::ChannelAuth { code: 190, message },
        Some(code) => ZapdeskError::channel(format!("business api error {code}: {message}")),
        None => ZapdeskError::channel(message),
    }
}

/// Graph API message type for a MIME type.
pub fn media_type_for(mime: &str) -> &'static str {
    match mime {
        "image/webp" => "sticker",
        m if m.starts_with("image/") => "image",
        m if m.starts_with("video/") => "video",
        m if m.starts_with("audio/") => "audio",
        _ => "document",
    }
}

/// Maps `status` and `quality_rating` of the phone number to a session status.
pub fn probe_status(info: &Value) -> ChannelProbe {
    let status = info.get("status").and_then(Value::as_str);
    let quality = info.get("quality_rating").and_then(Value::as_str);
    let healthy = matches!(status, None | Some("CONNECTED")) && quality != Some("RED");
    ChannelProbe {
        status: if healthy {
            SessionStatus::Connected
        } else {
            SessionStatus::Limited
        },
        detail: Some(format!(
            "status={} quality={}",
            status.unwrap_or("unknown"),
            quality.unwrap_or("unknown")
        )),
    }
}

#[async_trait]
impl Adapter for CloudApiClient {
    fn name(&self) -> &str {
        "business-api"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ZapdeskError> {
        match self.probe().await {
            Ok(p) if p.status == SessionStatus::Connected => Ok(HealthStatus::Healthy),
            Ok(p) => Ok(HealthStatus::Degraded(p.detail.unwrap_or_default())),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), ZapdeskError> {
        debug!(channel_id = self.channel_id, "business api client shutting down");
        Ok(())
    }
}

#[async_trait]
impl ChannelClient for CloudApiClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::BusinessApi
    }

    async fn send(&self, msg: OutboundMessage) -> Result<MessageId, ZapdeskError> {
        let media_id = match &msg.content {
            OutboundContent::Media { media, .. } => Some(self.upload_media(media).await?),
            _ => None,
        };
        let body = self.message_body(&msg, media_id.as_deref());
        let resp = self
            .post_json(&format!("{}/messages", self.phone_number_id), &body)
            .await?;
        resp.pointer("/messages/0/id")
            .and_then(Value::as_str)
            .map(|id| MessageId(id.to_string()))
            .ok_or_else(|| ZapdeskError::channel("business api response carried no message id"))
    }

    async fn probe(&self) -> Result<ChannelProbe, ZapdeskError> {
        let url = self.url(&format!(
            "{}?fields=quality_rating,status,name_status",
            self.phone_number_id
        ));
        let info = self.get_json(&url).await?;
        Ok(probe_status(&info))
    }

    async fn media_location(&self, media: &MediaRef) -> Result<MediaLocation, ZapdeskError> {
        let info = self.get_json(&self.url(&media.reference)).await?;
        let url = info
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ZapdeskError::not_found("media", &media.reference))?;
        Ok(MediaLocation {
            url: url.to_string(),
            bearer: Some(self.access_token.clone()),
        })
    }

    async fn upload_media(&self, media: &LocalMedia) -> Result<String, ZapdeskError> {
        let path = self.media_dir.join(&media.path);
        let bytes = tokio::fs::read(&path).await.map_err(|e| ZapdeskError::Channel {
            message: format!("failed to read {}: {e}", path.display()),
            source: Some(Box::new(e)),
        })?;
        let file_name = media
            .filename
            .clone()
            .unwrap_or_else(|| media.path.rsplit('/').next().unwrap_or("file").to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&media.mime_type)
            .map_err(|e| ZapdeskError::Validation(format!("invalid mime type: {e}")))?;
        let form = Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", media.mime_type.clone())
            .part("file", part);

        let resp = self
            .http
            .post(self.url(&format!("{}/media", self.phone_number_id)))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_response(resp).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ZapdeskError::channel("media upload returned no id"))
    }

    async fn directory_contacts(&self) -> Result<Vec<DirectoryContact>, ZapdeskError> {
        let Some(waba) = &self.business_account_id else {
            return Ok(Vec::new());
        };

        let mut contacts = Vec::new();
        let mut next = Some(self.url(&format!("{waba}/contacts")));
        let mut pages = 0;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_DIRECTORY_PAGES {
                warn!(channel_id = self.channel_id, "directory listing truncated");
                break;
            }
            let page = self.get_json(&url).await?;
            for entry in page.get("data").and_then(Value::as_array).into_iter().flatten() {
                let Some(wa_id) = entry.get("wa_id").and_then(Value::as_str) else {
                    continue;
                };
                contacts.push(DirectoryContact {
                    number: normalize_number(wa_id),
                    name: entry
                        .pointer("/profile/name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
            next = page
                .pointer("/paging/next")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        Ok(contacts)
    }
}
