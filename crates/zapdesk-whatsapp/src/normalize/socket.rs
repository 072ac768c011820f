// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Frames relayed by the socket-protocol bridge.
//!
//! The bridge forwards the protocol library's events as JSON:
//! `messages.upsert`, `messaging-history.set`, `messages.update`,
//! `groups.update`, `contacts.update` and `connection.update`. Message
//! objects keep the library's shape (`key`, `message`, `pushName`,
//! `messageTimestamp`).

use serde_json::Value;
use tracing::debug;

use zapdesk_core::types::{
    Ack, ContactUpdate, GroupUpdate, InboundMessage, MediaRef, MessageId, MessageType,
    MessageUpdate, Sender, SessionStatus, WireEvent, normalize_number,
};

use super::{location_body, owned, str_field, timestamp};

/// Status code the bridge reports when the device logged the session out.
pub const LOGGED_OUT_STATUS: i64 = 401;

/// Containers unwrapped one level before classification.
const WRAPPERS: &[&str] = &[
    "ephemeralMessage",
    "viewOnceMessage",
    "viewOnceMessageV2",
    "documentWithCaptionMessage",
];

/// Recognised content keys, checked in this order.
const CONTENT_TYPES: &[(&str, MessageType)] = &[
    ("conversation", MessageType::Conversation),
    ("extendedTextMessage", MessageType::ExtendedText),
    ("imageMessage", MessageType::Image),
    ("videoMessage", MessageType::Video),
    ("audioMessage", MessageType::Audio),
    ("documentMessage", MessageType::Document),
    ("stickerMessage", MessageType::Sticker),
    ("locationMessage", MessageType::Location),
    ("liveLocationMessage", MessageType::LiveLocation),
    ("contactMessage", MessageType::Contact),
    ("contactsArrayMessage", MessageType::ContactsArray),
    ("buttonsResponseMessage", MessageType::ButtonsResponse),
    ("listResponseMessage", MessageType::ListResponse),
    ("templateButtonReplyMessage", MessageType::TemplateButtonReply),
    ("interactiveResponseMessage", MessageType::InteractiveResponse),
    ("reactionMessage", MessageType::Reaction),
];

/// What a single message object turned into.
#[derive(Debug, Clone)]
pub enum Normalized {
    Message(InboundMessage),
    /// A protocol message revoking an earlier message.
    Revoked(MessageId),
}

/// Converts one bridge event into wire events. Unknown events yield nothing.
pub fn parse_event(event: &str, data: &Value) -> Vec<WireEvent> {
    match event {
        "messages.upsert" => messages(data.get("messages").unwrap_or(data), false),
        "messaging-history.set" => messages(data.get("messages").unwrap_or(data), true),
        "messages.update" => {
            let updates: Vec<MessageUpdate> = items(data).filter_map(message_update).collect();
            if updates.is_empty() {
                Vec::new()
            } else {
                vec![WireEvent::Acks(updates)]
            }
        }
        "groups.update" | "groups.upsert" => {
            let updates: Vec<GroupUpdate> = items(data)
                .filter_map(|g| {
                    Some(GroupUpdate {
                        group_id: normalize_number(str_field(g, "id")?),
                        subject: owned(g, "subject"),
                    })
                })
                .collect();
            if updates.is_empty() {
                Vec::new()
            } else {
                vec![WireEvent::GroupUpdates(updates)]
            }
        }
        "contacts.update" | "contacts.upsert" => {
            let updates: Vec<ContactUpdate> = items(data)
                .filter_map(|c| {
                    let id = str_field(c, "id")?;
                    if id.ends_with("@g.us") {
                        return None;
                    }
                    Some(ContactUpdate {
                        number: normalize_number(id),
                        name: owned(c, "name").or_else(|| owned(c, "notify")),
                        // The library sends the literal "changed" when only a
                        // refetch is needed.
                        picture_url: owned(c, "imgUrl").filter(|u| u != "changed"),
                    })
                })
                .collect();
            if updates.is_empty() {
                Vec::new()
            } else {
                vec![WireEvent::ContactUpdates(updates)]
            }
        }
        "connection.update" => connection_update(data).into_iter().collect(),
        other => {
            debug!(event = other, "ignoring bridge event");
            Vec::new()
        }
    }
}

fn items(data: &Value) -> impl Iterator<Item = &Value> {
    data.as_array().into_iter().flatten()
}

fn messages(list: &Value, is_import: bool) -> Vec<WireEvent> {
    let mut inbound = Vec::new();
    let mut revoked = Vec::new();
    for raw in items(list) {
        match normalize_message(raw, is_import) {
            Some(Normalized::Message(msg)) => inbound.push(msg),
            Some(Normalized::Revoked(id)) => revoked.push(MessageUpdate::Revoked { external_id: id }),
            None => {}
        }
    }

    let mut events = Vec::new();
    if !inbound.is_empty() {
        events.push(WireEvent::Messages(inbound));
    }
    if !revoked.is_empty() {
        events.push(WireEvent::Acks(revoked));
    }
    events
}

/// Normalizes one message object. Returns `None` when it lacks a key.
///
/// Unrecognised content still yields a message, typed
/// [`MessageType::Unsupported`], so the caller decides to drop it.
pub fn normalize_message(raw: &Value, is_import: bool) -> Option<Normalized> {
    let key = raw.get("key")?;
    let remote_jid = str_field(key, "remoteJid")?;
    let external_id = MessageId(owned(key, "id").unwrap_or_default());
    let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
    let is_group = remote_jid.ends_with("@g.us");

    let mut message = raw.get("message").filter(|m| m.is_object());
    let mut edit_of = None;

    if let Some(m) = message {
        if let Some(protocol) = protocol_message(m) {
            match protocol_kind(protocol) {
                ProtocolKind::Revoke => {
                    let target = protocol.get("key").and_then(|k| owned(k, "id"))?;
                    return Some(Normalized::Revoked(MessageId(target)));
                }
                ProtocolKind::Edit => {
                    edit_of = protocol.get("key").and_then(|k| owned(k, "id")).map(MessageId);
                    message = protocol.get("editedMessage");
                }
                ProtocolKind::Other => message = None,
            }
        }
    }

    let content = message.map(unwrap_once);
    let (message_type, body, media, quoted_id) = match content.and_then(classify) {
        Some((kind, part)) if remote_jid != "status@broadcast" => (
            kind,
            body_of(kind, part),
            media_of(kind, part, &external_id),
            quoted_of(kind, part),
        ),
        _ => (MessageType::Unsupported, None, None, None),
    };

    let number = normalize_number(remote_jid);
    let sender = Sender {
        number: number.clone(),
        name: if from_me { None } else { owned(raw, "pushName") },
        group_id: is_group.then_some(number),
        participant: str_field(key, "participant")
            .or_else(|| str_field(raw, "participant"))
            .map(normalize_number),
    };

    Some(Normalized::Message(InboundMessage {
        external_id,
        message_type,
        body,
        media,
        from_me,
        is_group,
        edit_of,
        quoted_id,
        sender,
        timestamp: raw.get("messageTimestamp").map(timestamp).unwrap_or_default(),
        is_import,
        raw: raw.clone(),
    }))
}

enum ProtocolKind {
    Revoke,
    Edit,
    Other,
}

/// The protocol message of an event, including the `editedMessage` wrapper.
fn protocol_message(message: &Value) -> Option<&Value> {
    message.get("protocolMessage").or_else(|| {
        message
            .get("editedMessage")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.get("protocolMessage"))
    })
}

fn protocol_kind(protocol: &Value) -> ProtocolKind {
    let kind = protocol.get("type");
    let is = |name: &str, code: i64| match kind {
        Some(Value::String(s)) => s == name,
        Some(Value::Number(n)) => n.as_i64() == Some(code),
        _ => false,
    };
    if protocol.get("editedMessage").is_some() || is("MESSAGE_EDIT", 14) {
        ProtocolKind::Edit
    } else if is("REVOKE", 0) {
        ProtocolKind::Revoke
    } else {
        ProtocolKind::Other
    }
}

/// Unwraps a single container level, if any.
pub fn unwrap_once(message: &Value) -> &Value {
    WRAPPERS
        .iter()
        .find_map(|w| message.get(*w).and_then(|inner| inner.get("message")))
        .unwrap_or(message)
}

/// Finds the content type of an (unwrapped) message object.
pub fn classify(message: &Value) -> Option<(MessageType, &Value)> {
    CONTENT_TYPES
        .iter()
        .find_map(|(key, kind)| message.get(*key).map(|part| (*kind, part)))
}

fn body_of(kind: MessageType, part: &Value) -> Option<String> {
    match kind {
        MessageType::Conversation => part.as_str().map(str::to_string),
        MessageType::ExtendedText => owned(part, "text"),
        MessageType::Image | MessageType::Video => owned(part, "caption"),
        MessageType::Document => owned(part, "caption").or_else(|| owned(part, "fileName")),
        MessageType::Audio | MessageType::Sticker => None,
        MessageType::Location | MessageType::LiveLocation => {
            let lat = part.get("degreesLatitude")?.as_f64()?;
            let lng = part.get("degreesLongitude")?.as_f64()?;
            Some(location_body(lat, lng, str_field(part, "name")))
        }
        MessageType::Contact => owned(part, "vcard").or_else(|| owned(part, "displayName")),
        MessageType::ContactsArray => {
            let cards: Vec<&str> = part
                .get("contacts")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|c| str_field(c, "vcard"))
                .collect();
            (!cards.is_empty()).then(|| cards.join("\n"))
        }
        MessageType::ButtonsResponse => {
            owned(part, "selectedButtonId").or_else(|| owned(part, "selectedDisplayText"))
        }
        MessageType::ListResponse => part
            .get("singleSelectReply")
            .and_then(|r| owned(r, "selectedRowId"))
            .or_else(|| owned(part, "title")),
        MessageType::TemplateButtonReply => {
            owned(part, "selectedId").or_else(|| owned(part, "selectedDisplayText"))
        }
        MessageType::InteractiveResponse => part
            .get("nativeFlowResponseMessage")
            .and_then(|n| str_field(n, "paramsJson"))
            .and_then(|p| serde_json::from_str::<Value>(p).ok())
            .and_then(|p| owned(&p, "id"))
            .or_else(|| part.get("body").and_then(|b| owned(b, "text"))),
        MessageType::Reaction => owned(part, "text"),
        MessageType::Unsupported => None,
    }
}

fn media_of(kind: MessageType, part: &Value, id: &MessageId) -> Option<MediaRef> {
    let media_kind = kind.media_kind()?;
    Some(MediaRef {
        kind: media_kind,
        // The bridge downloads by message id.
        reference: id.0.clone(),
        mime_type: owned(part, "mimetype"),
        filename: owned(part, "fileName"),
    })
}

fn quoted_of(kind: MessageType, part: &Value) -> Option<MessageId> {
    if kind == MessageType::Reaction {
        return part.get("key").and_then(|k| owned(k, "id")).map(MessageId);
    }
    part.get("contextInfo")
        .and_then(|c| owned(c, "stanzaId"))
        .map(MessageId)
}

fn message_update(item: &Value) -> Option<MessageUpdate> {
    let id = item.get("key").and_then(|k| owned(k, "id"))?;
    let update = item.get("update")?;

    let stub = update.get("messageStubType");
    let revoked = matches!(stub, Some(Value::Number(n)) if n.as_i64() == Some(1))
        || matches!(stub, Some(Value::String(s)) if s == "REVOKE");
    if revoked {
        return Some(MessageUpdate::Revoked {
            external_id: MessageId(id),
        });
    }

    let ack = match update.get("status")? {
        Value::Number(n) => status_code_ack(n.as_i64()?),
        Value::String(s) => status_name_ack(s),
        _ => None,
    }?;
    Some(MessageUpdate::Ack {
        external_id: MessageId(id),
        ack,
    })
}

/// Library delivery statuses: 0 error, 1 pending, 2 server ack,
/// 3 delivered, 4 read, 5 played.
fn status_code_ack(code: i64) -> Option<Ack> {
    match code {
        0 => Some(Ack::Failed),
        2 => Some(Ack::Sent),
        3 => Some(Ack::Delivered),
        4 | 5 => Some(Ack::Read),
        _ => None,
    }
}

fn status_name_ack(name: &str) -> Option<Ack> {
    match name {
        "ERROR" => Some(Ack::Failed),
        "SERVER_ACK" => Some(Ack::Sent),
        "DELIVERY_ACK" => Some(Ack::Delivered),
        "READ" | "PLAYED" => Some(Ack::Read),
        _ => None,
    }
}

fn connection_update(data: &Value) -> Option<WireEvent> {
    match str_field(data, "connection")? {
        "open" => Some(WireEvent::Connection(SessionStatus::Connected)),
        "close" => {
            let code = data
                .get("statusCode")
                .and_then(Value::as_i64)
                .or_else(|| {
                    data.pointer("/lastDisconnect/error/output/statusCode")
                        .and_then(Value::as_i64)
                });
            if code == Some(LOGGED_OUT_STATUS) {
                // Surfaces as the fatal auth class so the channel is dropped.
                Some(WireEvent::ChannelError {
                    code: 0,
                    message: "session logged out by device (401)".into(),
                })
            } else {
                Some(WireEvent::Connection(SessionStatus::Disconnected))
            }
        }
        _ => None,
    }
}
