// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-specific payloads to canonical [`InboundMessage`]s.
//!
//! Classification is allow-list based: a payload whose subtype is not
//! recognised becomes [`MessageType::Unsupported`], which
//! [`InboundMessage::is_valid`] rejects before any side effect runs.
//!
//! [`InboundMessage`]: zapdesk_core::types::InboundMessage
//! [`InboundMessage::is_valid`]: zapdesk_core::types::InboundMessage::is_valid
//! [`MessageType::Unsupported`]: zapdesk_core::types::MessageType::Unsupported

pub mod cloud;
pub mod socket;

use serde_json::Value;

/// Reads a string field, ignoring empty values.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.as_str().filter(|s| !s.is_empty())
}

pub(crate) fn owned(value: &Value, key: &str) -> Option<String> {
    str_field(value, key).map(str::to_string)
}

/// Unix timestamp sent either as a number or as a numeric string.
pub(crate) fn timestamp(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        // Long-style `{ low, high }` timestamps from protobuf JSON.
        Value::Object(o) => o.get("low").and_then(Value::as_i64).unwrap_or_default(),
        _ => 0,
    }
}

/// Map link for a shared location.
pub(crate) fn location_body(lat: f64, lng: f64, name: Option<&str>) -> String {
    let link = format!("https://maps.google.com/maps?q={lat},{lng}&z=17");
    match name {
        Some(name) => format!("{name}\n{link}"),
        None => link,
    }
}
