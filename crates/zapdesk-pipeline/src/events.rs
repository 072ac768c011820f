// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime events the pipeline emits for operator UIs.

use serde_json::json;
use strum::Display;

use zapdesk_core::models::{Contact, StoredMessage, Ticket};
use zapdesk_core::types::{ChannelId, SessionStatus, TenantId};
use zapdesk_core::{EventPublisher, Priority, RealtimeEvent, rooms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// Rooms that follow a ticket: its status room, its own room and its queue room.
pub fn ticket_rooms(ticket: &Ticket) -> Vec<String> {
    let mut out = vec![
        rooms::tenant_status(ticket.tenant_id, ticket.status),
        rooms::ticket(ticket.id),
    ];
    if let Some(queue_id) = ticket.queue_id {
        out.push(rooms::queue_status(queue_id, ticket.status));
    }
    out
}

pub fn ticket_events(ticket: &Ticket, action: Action) -> Vec<RealtimeEvent> {
    let payload = json!({ "action": action.to_string(), "ticket": ticket });
    let priority = match action {
        Action::Create => Priority::High,
        _ => Priority::Medium,
    };
    ticket_rooms(ticket)
        .into_iter()
        .map(|room| RealtimeEvent::new(room, "ticket", payload.clone(), priority))
        .collect()
}

pub fn message_events(
    ticket: &Ticket,
    contact: Option<&Contact>,
    message: &StoredMessage,
    action: Action,
) -> Vec<RealtimeEvent> {
    let payload = json!({
        "action": action.to_string(),
        "message": message,
        "ticket": ticket,
        "contact": contact,
    });
    ticket_rooms(ticket)
        .into_iter()
        .map(|room| RealtimeEvent::new(room, "appMessage", payload.clone(), Priority::Medium))
        .collect()
}

pub fn channel_status_event(
    tenant_id: TenantId,
    channel_id: ChannelId,
    status: SessionStatus,
) -> RealtimeEvent {
    RealtimeEvent::new(
        rooms::tenant_main(tenant_id),
        "whatsappSession",
        json!({ "action": "update", "session": { "id": channel_id, "status": status } }),
        Priority::High,
    )
}

pub fn contact_event(contact: &Contact) -> RealtimeEvent {
    RealtimeEvent::new(
        rooms::tenant_main(contact.tenant_id),
        "contact",
        json!({ "action": "update", "contact": contact }),
        Priority::Low,
    )
}

pub async fn publish_all(publisher: &dyn EventPublisher, events: Vec<RealtimeEvent>) {
    for event in events {
        publisher.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use zapdesk_core::types::TicketStatus;

    fn ticket(queue_id: Option<i64>) -> Ticket {
        Ticket {
            id: 9,
            tenant_id: 2,
            contact_id: 1,
            channel_id: 1,
            status: TicketStatus::Pending,
            user_id: None,
            queue_id,
            chatbot: false,
            is_group: false,
            integration_id: None,
            use_integration: false,
            flow_execution_id: None,
            appointment_mode: false,
            prompt_id: None,
            unread_messages: 1,
            last_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn queue_room_only_when_queued() {
        assert_eq!(ticket_rooms(&ticket(None)), vec!["tenant-2-pending", "ticket-9"]);
        assert_eq!(
            ticket_rooms(&ticket(Some(4))),
            vec!["tenant-2-pending", "ticket-9", "queue-4-pending"]
        );
    }

    #[test]
    fn ticket_payload_carries_action() {
        let events = ticket_events(&ticket(None), Action::Update);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "ticket");
        assert_eq!(events[0].payload["action"], "update");
        assert_eq!(events[0].payload["ticket"]["id"], 9);
    }

    #[test]
    fn channel_status_goes_to_main_room() {
        let e = channel_status_event(3, 8, SessionStatus::Limited);
        assert_eq!(e.room, "tenant-3-mainchannel");
        assert_eq!(e.payload["session"]["status"], "LIMITED");
        assert_eq!(e.priority, Priority::High);
    }
}
