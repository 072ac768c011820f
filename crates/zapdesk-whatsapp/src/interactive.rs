// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Field limits for button and list messages and their Graph API encoding.
//!
//! The provider rejects oversized fields outright, so every interactive
//! message is clamped before it leaves the process.

use serde_json::{Value, json};

use zapdesk_core::types::{InteractiveAction, InteractiveMessage, ListRow, ListSection, ReplyButton};

pub const MAX_BUTTONS: usize = 3;
pub const MAX_LIST_ROWS: usize = 10;
pub const HEADER_LIMIT: usize = 60;
pub const BODY_LIMIT: usize = 1024;
pub const FOOTER_LIMIT: usize = 60;
pub const BUTTON_TITLE_LIMIT: usize = 20;
pub const ROW_TITLE_LIMIT: usize = 24;
pub const ROW_DESCRIPTION_LIMIT: usize = 72;

/// Cuts `text` to at most `max` characters, never splitting a char.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Returns a copy that satisfies every provider limit.
///
/// Extra buttons are dropped; list rows beyond the total budget are dropped
/// across sections in order, and sections left empty are removed.
pub fn clamp(msg: &InteractiveMessage) -> InteractiveMessage {
    let action = match &msg.action {
        InteractiveAction::Buttons(buttons) => InteractiveAction::Buttons(
            buttons
                .iter()
                .take(MAX_BUTTONS)
                .map(|b| ReplyButton {
                    id: b.id.clone(),
                    title: truncate(&b.title, BUTTON_TITLE_LIMIT),
                })
                .collect(),
        ),
        InteractiveAction::List { button, sections } => {
            let mut budget = MAX_LIST_ROWS;
            let mut clamped = Vec::with_capacity(sections.len());
            for section in sections {
                if budget == 0 {
                    break;
                }
                let rows: Vec<_> = section
                    .rows
                    .iter()
                    .take(budget)
                    .map(|r| ListRow {
                        id: r.id.clone(),
                        title: truncate(&r.title, ROW_TITLE_LIMIT),
                        description: r
                            .description
                            .as_deref()
                            .map(|d| truncate(d, ROW_DESCRIPTION_LIMIT)),
                    })
                    .collect();
                budget -= rows.len();
                if !rows.is_empty() {
                    clamped.push(ListSection {
                        title: truncate(&section.title, ROW_TITLE_LIMIT),
                        rows,
                    });
                }
            }
            InteractiveAction::List {
                button: truncate(button, BUTTON_TITLE_LIMIT),
                sections: clamped,
            }
        }
    };

    InteractiveMessage {
        header: msg.header.as_deref().map(|h| truncate(h, HEADER_LIMIT)),
        body: truncate(&msg.body, BODY_LIMIT),
        footer: msg.footer.as_deref().map(|f| truncate(f, FOOTER_LIMIT)),
        action,
    }
}

/// The `interactive` object of a Graph API send request, clamped.
pub fn to_graph_json(msg: &InteractiveMessage) -> Value {
    let msg = clamp(msg);
    let mut out = json!({ "body": { "text": msg.body } });

    if let Some(header) = &msg.header {
        out["header"] = json!({ "type": "text", "text": header });
    }
    if let Some(footer) = &msg.footer {
        out["footer"] = json!({ "text": footer });
    }

    match &msg.action {
        InteractiveAction::Buttons(buttons) => {
            out["type"] = json!("button");
            out["action"] = json!({
                "buttons": buttons
                    .iter()
                    .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
                    .collect::<Vec<_>>()
            });
        }
        InteractiveAction::List { button, sections } => {
            out["type"] = json!("list");
            out["action"] = json!({
                "button": button,
                "sections": sections
                    .iter()
                    .map(|s| json!({
                        "title": s.title,
                        "rows": s.rows.iter().map(|r| {
                            let mut row = json!({ "id": r.id, "title": r.title });
                            if let Some(d) = &r.description {
                                row["description"] = json!(d);
                            }
                            row
                        }).collect::<Vec<_>>()
                    }))
                    .collect::<Vec<_>>()
            });
        }
    }
    out
}

/// Plain-text rendering for transports without interactive support.
///
/// Rows and buttons are numbered from 1 so a positional reply maps back
/// onto the option list.
pub fn to_plain_text(msg: &InteractiveMessage) -> String {
    let mut lines = Vec::new();
    if let Some(header) = &msg.header {
        lines.push(format!("*{header}*"));
    }
    lines.push(msg.body.clone());
    lines.push(String::new());
    match &msg.action {
        InteractiveAction::Buttons(buttons) => {
            for (i, b) in buttons.iter().enumerate() {
                lines.push(format!("[{}] - {}", i + 1, b.title));
            }
        }
        InteractiveAction::List { sections, .. } => {
            let rows = sections.iter().flat_map(|s| s.rows.iter());
            for (i, r) in rows.enumerate() {
                lines.push(format!("[{}] - {}", i + 1, r.title));
            }
        }
    }
    if let Some(footer) = &msg.footer {
        lines.push(String::new());
        lines.push(format!("_{footer}_"));
    }
    lines.join("\n")
}
