// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Business API webhook payloads.
//!
//! A POST body holds `entry[].changes[].value` objects, each of which may
//! carry `messages`, `statuses` and `errors` arrays.

use serde_json::Value;
use tracing::debug;

use zapdesk_core::ZapdeskError;
use zapdesk_core::types::{
    Ack, InboundMessage, MediaKind, MediaRef, MessageId, MessageType, MessageUpdate, Sender,
    WireEvent, normalize_number,
};

use super::{location_body, owned, str_field, timestamp};

/// Parses a webhook body into wire events, in payload order.
pub fn parse_webhook(payload: &Value) -> Result<Vec<WireEvent>, ZapdeskError> {
    let object = str_field(payload, "object").unwrap_or_default();
    if object != "whatsapp_business_account" {
        return Err(ZapdeskError::Validation(format!(
            "unexpected webhook object `{object}`"
        )));
    }

    let mut events = Vec::new();
    let changes = payload
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|e| e.get("changes").and_then(Value::as_array))
        .flatten();

    for change in changes {
        if str_field(change, "field").is_some_and(|f| f != "messages") {
            debug!(field = ?change.get("field"), "ignoring webhook change");
            continue;
        }
        let Some(value) = change.get("value") else {
            continue;
        };
        events.extend(parse_value(value));
    }
    Ok(events)
}

fn parse_value(value: &Value) -> Vec<WireEvent> {
    let mut events = Vec::new();

    for err in array(value, "errors") {
        events.push(WireEvent::ChannelError {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: owned(err, "message")
                .or_else(|| owned(err, "title"))
                .unwrap_or_else(|| "unknown error".into()),
        });
    }

    let statuses: Vec<MessageUpdate> = array(value, "statuses").filter_map(status_update).collect();
    if !statuses.is_empty() {
        events.push(WireEvent::Acks(statuses));
    }

    let contacts: Vec<&Value> = array(value, "contacts").collect();
    let messages: Vec<InboundMessage> = array(value, "messages")
        .filter_map(|m| normalize_message(m, &contacts))
        .collect();
    if !messages.is_empty() {
        events.push(WireEvent::Messages(messages));
    }
    events
}

fn array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value.get(key).and_then(Value::as_array).into_iter().flatten()
}

fn status_update(status: &Value) -> Option<MessageUpdate> {
    let id = owned(status, "id")?;
    let ack = Ack::from_status(str_field(status, "status")?)?;
    Some(MessageUpdate::Ack {
        external_id: MessageId(id),
        ack,
    })
}

/// Normalizes one entry of `value.messages`.
///
/// `contacts` is the sibling `value.contacts` array used for profile names.
pub fn normalize_message(msg: &Value, contacts: &[&Value]) -> Option<InboundMessage> {
    let from = str_field(msg, "from")?;
    let id = owned(msg, "id").unwrap_or_default();
    let kind = str_field(msg, "type").unwrap_or("unknown");

    let name = contacts
        .iter()
        .find(|c| str_field(c, "wa_id") == Some(from))
        .and_then(|c| c.get("profile"))
        .and_then(|p| owned(p, "name"));

    let (message_type, body, media, mut quoted_id) = classify(kind, msg);
    if quoted_id.is_none() {
        quoted_id = msg.get("context").and_then(|c| owned(c, "id")).map(MessageId);
    }

    Some(InboundMessage {
        external_id: MessageId(id),
        message_type,
        body,
        media,
        from_me: false,
        is_group: false,
        edit_of: None,
        quoted_id,
        sender: Sender {
            number: normalize_number(from),
            name,
            group_id: None,
            participant: None,
        },
        timestamp: msg.get("timestamp").map(timestamp).unwrap_or_default(),
        is_import: false,
        raw: msg.clone(),
    })
}

type Classified = (MessageType, Option<String>, Option<MediaRef>, Option<MessageId>);

static NULL: Value = Value::Null;

fn classify(kind: &str, msg: &Value) -> Classified {
    let part = msg.get(kind).unwrap_or(&NULL);
    match kind {
        "text" => (MessageType::Conversation, owned(part, "body"), None, None),
        "image" => media(MessageType::Image, MediaKind::Image, part),
        "video" => media(MessageType::Video, MediaKind::Video, part),
        "audio" => media(MessageType::Audio, MediaKind::Audio, part),
        "sticker" => media(MessageType::Sticker, MediaKind::Sticker, part),
        "document" => {
            let (t, mut body, m, q) = media(MessageType::Document, MediaKind::Document, part);
            if body.is_none() {
                body = owned(part, "filename");
            }
            (t, body, m, q)
        }
        "location" => {
            let body = match (
                part.get("latitude").and_then(Value::as_f64),
                part.get("longitude").and_then(Value::as_f64),
            ) {
                (Some(lat), Some(lng)) => Some(location_body(lat, lng, str_field(part, "name"))),
                _ => None,
            };
            (MessageType::Location, body, None, None)
        }
        "contacts" => {
            let cards: Vec<String> = msg
                .get("contacts")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(contact_card)
                .collect();
            let t = if cards.len() > 1 {
                MessageType::ContactsArray
            } else {
                MessageType::Contact
            };
            (t, (!cards.is_empty()).then(|| cards.join("\n")), None, None)
        }
        "button" => (
            MessageType::TemplateButtonReply,
            owned(part, "payload").or_else(|| owned(part, "text")),
            None,
            None,
        ),
        "interactive" => match str_field(part, "type") {
            Some("button_reply") => (
                MessageType::ButtonsResponse,
                part.get("button_reply").and_then(|r| owned(r, "id")),
                None,
                None,
            ),
            Some("list_reply") => (
                MessageType::ListResponse,
                part.get("list_reply").and_then(|r| owned(r, "id")),
                None,
                None,
            ),
            Some("nfm_reply") => (
                MessageType::InteractiveResponse,
                part.get("nfm_reply").and_then(|r| owned(r, "body")),
                None,
                None,
            ),
            _ => (MessageType::Unsupported, None, None, None),
        },
        "reaction" => (
            MessageType::Reaction,
            owned(part, "emoji"),
            None,
            owned(part, "message_id").map(MessageId),
        ),
        _ => (MessageType::Unsupported, None, None, None),
    }
}

fn media(t: MessageType, kind: MediaKind, part: &Value) -> Classified {
    let media = owned(part, "id").map(|id| MediaRef {
        kind,
        reference: id,
        mime_type: owned(part, "mime_type"),
        filename: owned(part, "filename"),
    });
    (t, owned(part, "caption"), media, None)
}

/// Minimal vCard for a shared contact.
fn contact_card(contact: &Value) -> String {
    let name = contact
        .get("name")
        .and_then(|n| owned(n, "formatted_name"))
        .unwrap_or_default();
    let phone = contact
        .get("phones")
        .and_then(Value::as_array)
        .and_then(|p| p.first())
        .and_then(|p| owned(p, "phone"))
        .unwrap_or_default();
    format!("BEGIN:VCARD\nVERSION:3.0\nFN:{name}\nTEL:{phone}\nEND:VCARD")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "WABA", "changes": [{"field": "messages", "value": value}]}]
        })
    }

    fn single(events: &[WireEvent]) -> &InboundMessage {
        match events {
            [WireEvent::Messages(m)] if m.len() == 1 => &m[0],
            other => panic!("expected one message, got {other:?}"),
        }
    }

    #[test]
    fn text_with_profile_name() {
        let payload = envelope(json!({
            "metadata": {"phone_number_id": "PN1"},
            "contacts": [{"profile": {"name": "John"}, "wa_id": "15551234567"}],
            "messages": [{"from": "15551234567", "id": "wamid.1", "timestamp": "1700000000",
                          "type": "text", "text": {"body": "Hello"}}]
        }));
        let events = parse_webhook(&payload).unwrap();
        let msg = single(&events);
        assert_eq!(msg.body.as_deref(), Some("Hello"));
        assert_eq!(msg.sender.name.as_deref(), Some("John"));
        assert_eq!(msg.timestamp, 1_700_000_000);
        assert!(msg.is_valid());
    }

    #[test]
    fn image_uses_media_id() {
        let payload = envelope(json!({"messages": [{
            "from": "1555", "id": "wamid.2", "type": "image",
            "image": {"id": "MEDIA9", "mime_type": "image/png", "caption": "nota"}
        }]}));
        let events = parse_webhook(&payload).unwrap();
        let msg = single(&events);
        assert_eq!(msg.message_type, MessageType::Image);
        let media = msg.media.as_ref().unwrap();
        assert_eq!(media.reference, "MEDIA9");
        assert_eq!(media.mime_type.as_deref(), Some("image/png"));
        assert_eq!(msg.body.as_deref(), Some("nota"));
    }

    #[test]
    fn interactive_reply_and_context() {
        let payload = envelope(json!({"messages": [{
            "from": "1555", "id": "wamid.3", "type": "interactive",
            "context": {"id": "wamid.menu"},
            "interactive": {"type": "list_reply", "list_reply": {"id": "2", "title": "Suporte"}}
        }]}));
        let events = parse_webhook(&payload).unwrap();
        let msg = single(&events);
        assert_eq!(msg.message_type, MessageType::ListResponse);
        assert_eq!(msg.body.as_deref(), Some("2"));
        assert_eq!(msg.quoted_id, Some(MessageId("wamid.menu".into())));
    }

    #[test]
    fn unknown_type_is_invalid() {
        let payload = envelope(json!({"messages": [{
            "from": "1555", "id": "wamid.4", "type": "order", "order": {}
        }]}));
        let events = parse_webhook(&payload).unwrap();
        assert!(!single(&events).is_valid());
    }

    #[test]
    fn statuses_and_errors() {
        let payload = envelope(json!({
            "statuses": [
                {"id": "wamid.5", "status": "read", "recipient_id": "1555"},
                {"id": "wamid.6", "status": "deleted"}
            ],
            "errors": [{"code": 190, "title": "Access token expired"}]
        }));
        let events = parse_webhook(&payload).unwrap();
        assert!(matches!(&events[0], WireEvent::ChannelError { code: 190, message } if message == "Access token expired"));
        let WireEvent::Acks(acks) = &events[1] else {
            panic!("expected acks");
        };
        assert_eq!(
            acks,
            &vec![MessageUpdate::Ack { external_id: MessageId("wamid.5".into()), ack: Ack::Read }]
        );
    }

    #[test]
    fn rejects_foreign_object() {
        assert!(parse_webhook(&json!({"object": "page", "entry": []})).is_err());
    }
}
