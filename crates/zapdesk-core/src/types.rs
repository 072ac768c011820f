// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits, transports and the inbound pipeline.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub type TenantId = i64;
pub type ChannelId = i64;
pub type ContactId = i64;
pub type TicketId = i64;
pub type QueueId = i64;
pub type UserId = i64;

/// Provider-assigned message identifier, unique per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the role of an adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
    Media,
    Observability,
}

/// The two transports a channel can run on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Unofficial multi-device socket protocol, reached through a bridge.
    Socket,
    /// Official hosted Business API (HTTP requests plus webhooks).
    BusinessApi,
}

/// Connection state of a channel as persisted and broadcast to operators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Connected,
    Disconnected,
    /// Reachable but the provider reports a degraded or restricted account.
    Limited,
}

/// Lifecycle of a ticket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Open,
    Closed,
}

/// Delivery acknowledgement level of an outbound message.
///
/// Codes are ordered; a stored ack only ever moves to a higher code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum Ack {
    Unknown = 0,
    Sent = 1,
    Delivered = 2,
    Read = 3,
    Failed = 4,
}

impl Ack {
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Maps a wire code; anything out of range is clamped.
    pub fn from_code(code: i64) -> Self {
        match code {
            i64::MIN..=0 => Self::Unknown,
            1 => Self::Sent,
            2 => Self::Delivered,
            3 => Self::Read,
            _ => Self::Failed,
        }
    }

    /// Maps a Business API status string.
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl From<i64> for Ack {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<Ack> for i64 {
    fn from(ack: Ack) -> Self {
        ack.code()
    }
}

/// Canonical message type after normalization.
///
/// Anything outside the allow-list maps to [`MessageType::Unsupported`] and is
/// dropped by the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Conversation,
    ExtendedText,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    LiveLocation,
    Contact,
    ContactsArray,
    ButtonsResponse,
    ListResponse,
    TemplateButtonReply,
    InteractiveResponse,
    Reaction,
    Unsupported,
}

impl MessageType {
    pub fn is_supported(self) -> bool {
        self != Self::Unsupported
    }

    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            Self::Image => Some(MediaKind::Image),
            Self::Video => Some(MediaKind::Video),
            Self::Audio => Some(MediaKind::Audio),
            Self::Document => Some(MediaKind::Document),
            Self::Sticker => Some(MediaKind::Sticker),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn default_mime(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
            Self::Audio => "audio/ogg",
            Self::Document => "application/octet-stream",
            Self::Sticker => "image/webp",
        }
    }
}

/// Provider-side reference to an attachment that has not been downloaded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Business API media id, or the socket bridge's direct path.
    pub reference: String,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

/// A resolved download location for a [`MediaRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLocation {
    pub url: String,
    pub bearer: Option<String>,
}

/// A file held by the media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMedia {
    /// Path relative to the media root; also the public URL suffix.
    pub path: String,
    pub mime_type: String,
    pub filename: Option<String>,
    pub size: u64,
}

/// Who sent an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Digits-only phone number of the counterpart (the group id for groups).
    pub number: String,
    pub name: Option<String>,
    /// Group identifier when the conversation is a group.
    pub group_id: Option<String>,
    /// The group member who actually wrote the message.
    pub participant: Option<String>,
}

/// A message after transport-specific normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub external_id: MessageId,
    pub message_type: MessageType,
    pub body: Option<String>,
    pub media: Option<MediaRef>,
    pub from_me: bool,
    pub is_group: bool,
    /// Set when this event edits an earlier message; holds the edited message's id.
    pub edit_of: Option<MessageId>,
    pub quoted_id: Option<MessageId>,
    pub sender: Sender,
    /// Unix seconds.
    pub timestamp: i64,
    /// History sync delivery rather than a live message.
    pub is_import: bool,
    pub raw: serde_json::Value,
}

impl InboundMessage {
    pub fn is_valid(&self) -> bool {
        self.message_type.is_supported() && !self.external_id.0.is_empty()
    }

    pub fn is_edit(&self) -> bool {
        self.edit_of.is_some()
    }

    /// Body text or an empty string.
    pub fn text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// A status change for a previously sent or received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageUpdate {
    Ack { external_id: MessageId, ack: Ack },
    Revoked { external_id: MessageId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub group_id: String,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub number: String,
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

/// Everything a transport can hand to the pipeline.
#[derive(Debug, Clone)]
pub enum WireEvent {
    Messages(Vec<InboundMessage>),
    /// Ack changes and revocations.
    Acks(Vec<MessageUpdate>),
    GroupUpdates(Vec<GroupUpdate>),
    ContactUpdates(Vec<ContactUpdate>),
    Connection(SessionStatus),
    ChannelError { code: i64, message: String },
}

/// Message handed to a [`crate::ChannelClient`] for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Digits-only number or group id.
    pub to: String,
    pub content: OutboundContent,
    pub quoted: Option<MessageId>,
}

impl OutboundMessage {
    pub fn text(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            content: OutboundContent::Text(body.into()),
            quoted: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundContent {
    Text(String),
    Media {
        media: LocalMedia,
        caption: Option<String>,
    },
    Interactive(InteractiveMessage),
}

/// Button or list message. Transports enforce the provider's field limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveMessage {
    pub header: Option<String>,
    pub body: String,
    pub footer: Option<String>,
    pub action: InteractiveAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InteractiveAction {
    Buttons(Vec<ReplyButton>),
    List {
        button: String,
        sections: Vec<ListSection>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

/// Result of a channel liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProbe {
    pub status: SessionStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    pub participants: Vec<String>,
}

/// A contact exposed by the provider's address book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryContact {
    pub number: String,
    pub name: Option<String>,
}

/// Strips everything but ASCII digits from a phone number or jid user part.
pub fn normalize_number(raw: &str) -> String {
    let user = raw.split(['@', ':']).next().unwrap_or(raw);
    user.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ack_is_ordered_and_clamped() {
        assert!(Ack::Read > Ack::Delivered);
        assert_eq!(Ack::from_code(-3), Ack::Unknown);
        assert_eq!(Ack::from_code(9), Ack::Failed);
        assert_eq!(Ack::from_status("delivered"), Some(Ack::Delivered));
        assert_eq!(Ack::from_status("deleted"), None);
    }

    #[test]
    fn session_status_wire_names() {
        assert_eq!(SessionStatus::Connected.to_string(), "CONNECTED");
        assert_eq!(
            SessionStatus::from_str("LIMITED").unwrap(),
            SessionStatus::Limited
        );
        let json = serde_json::to_string(&SessionStatus::Disconnected).unwrap();
        assert_eq!(json, "\"DISCONNECTED\"");
    }

    #[test]
    fn message_type_names_are_camel_case() {
        assert_eq!(MessageType::ExtendedText.to_string(), "extendedText");
        assert_eq!(
            MessageType::from_str("buttonsResponse").unwrap(),
            MessageType::ButtonsResponse
        );
        assert!(!MessageType::Unsupported.is_supported());
        assert_eq!(MessageType::Sticker.media_kind(), Some(MediaKind::Sticker));
    }

    #[test]
    fn normalize_number_strips_jid_and_device() {
        assert_eq!(normalize_number("5511999990000@s.whatsapp.net"), "5511999990000");
        assert_eq!(normalize_number("5511999990000:12@s.whatsapp.net"), "5511999990000");
        assert_eq!(normalize_number("+55 (11) 99999-0000"), "5511999990000");
    }

    proptest::proptest! {
        #[test]
        fn normalized_numbers_are_digits_only(s in ".{0,40}") {
            let n = normalize_number(&s);
            proptest::prop_assert!(n.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
