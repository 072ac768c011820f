// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ticket lookups and writes.
//!
//! The "one active ticket per contact" rule is enforced by the resolver's
//! per-contact lock, not by a constraint here.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{NewTicket, Ticket};
use zapdesk_core::types::{ChannelId, ContactId, TenantId, TicketId};

use crate::database::{Database, map_tr_err};
use crate::queries::get_enum;

const TICKET_COLUMNS: &str = "id, tenant_id, contact_id, channel_id, status, user_id, queue_id,
    chatbot, is_group, integration_id, use_integration, flow_execution_id, appointment_mode,
    prompt_id, unread_messages, last_message, created_at, updated_at";

fn row_to_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        contact_id: row.get(2)?,
        channel_id: row.get(3)?,
        status: get_enum(row, 4)?,
        user_id: row.get(5)?,
        queue_id: row.get(6)?,
        chatbot: row.get(7)?,
        is_group: row.get(8)?,
        integration_id: row.get(9)?,
        use_integration: row.get(10)?,
        flow_execution_id: row.get(11)?,
        appointment_mode: row.get(12)?,
        prompt_id: row.get(13)?,
        unread_messages: row.get(14)?,
        last_message: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

async fn find_one(
    db: &Database,
    filter: &'static str,
    tenant_id: TenantId,
    contact_id: ContactId,
    channel_id: ChannelId,
) -> Result<Option<Ticket>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {TICKET_COLUMNS} FROM tickets
                     WHERE tenant_id = ?1 AND contact_id = ?2 AND channel_id = ?3 {filter}
                     ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                params![tenant_id, contact_id, channel_id],
                row_to_ticket,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn find_active_ticket(
    db: &Database,
    tenant_id: TenantId,
    contact_id: ContactId,
    channel_id: ChannelId,
) -> Result<Option<Ticket>, ZapdeskError> {
    find_one(db, "AND status != 'closed'", tenant_id, contact_id, channel_id).await
}

pub async fn find_latest_ticket(
    db: &Database,
    tenant_id: TenantId,
    contact_id: ContactId,
    channel_id: ChannelId,
) -> Result<Option<Ticket>, ZapdeskError> {
    find_one(db, "", tenant_id, contact_id, channel_id).await
}

pub async fn get_ticket(db: &Database, id: TicketId) -> Result<Option<Ticket>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
                params![id],
                row_to_ticket,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn create_ticket(
    db: &Database,
    ticket: &NewTicket,
    now: DateTime<Utc>,
) -> Result<Ticket, ZapdeskError> {
    let t = ticket.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO tickets (tenant_id, contact_id, channel_id, status, is_group,
                        unread_messages, integration_id, use_integration, prompt_id,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                     RETURNING {TICKET_COLUMNS}"
                ),
                params![
                    t.tenant_id,
                    t.contact_id,
                    t.channel_id,
                    t.status.to_string(),
                    t.is_group,
                    t.unread_messages,
                    t.integration_id,
                    t.use_integration,
                    t.prompt_id,
                    now,
                ],
                row_to_ticket,
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Writes every mutable column and bumps `updated_at`.
pub async fn update_ticket(
    db: &Database,
    ticket: &Ticket,
    now: DateTime<Utc>,
) -> Result<(), ZapdeskError> {
    let t = ticket.clone();
    let affected = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets SET status = ?1, user_id = ?2, queue_id = ?3, chatbot = ?4,
                    integration_id = ?5, use_integration = ?6, flow_execution_id = ?7,
                    appointment_mode = ?8, prompt_id = ?9, unread_messages = ?10,
                    last_message = ?11, updated_at = ?12
                 WHERE id = ?13",
                params![
                    t.status.to_string(),
                    t.user_id,
                    t.queue_id,
                    t.chatbot,
                    t.integration_id,
                    t.use_integration,
                    t.flow_execution_id,
                    t.appointment_mode,
                    t.prompt_id,
                    t.unread_messages,
                    t.last_message,
                    now,
                    t.id,
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;

    if affected == 0 {
        return Err(ZapdeskError::not_found("ticket", ticket.id));
    }
    Ok(())
}

pub async fn count_active_tickets(
    db: &Database,
    tenant_id: TenantId,
    contact_id: ContactId,
) -> Result<i64, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM tickets
                 WHERE tenant_id = ?1 AND contact_id = ?2 AND status != 'closed'",
                params![tenant_id, contact_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::contacts::upsert_contact;
    use tempfile::tempdir;
    use zapdesk_core::models::NewContact;
    use zapdesk_core::types::TicketStatus;

    async fn setup() -> (Database, tempfile::TempDir, ContactId) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let contact = upsert_contact(
            &db,
            &NewContact {
                tenant_id: 1,
                name: "Ana".into(),
                number: "5511".into(),
                is_group: false,
                channel_id: Some(1),
                profile_pic_url: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        (db, dir, contact.id)
    }

    fn new_ticket(contact_id: ContactId) -> NewTicket {
        NewTicket {
            tenant_id: 1,
            contact_id,
            channel_id: 1,
            status: TicketStatus::Pending,
            is_group: false,
            unread_messages: 1,
            integration_id: None,
            use_integration: false,
            prompt_id: None,
        }
    }

    #[tokio::test]
    async fn closed_tickets_are_not_active() {
        let (db, _dir, contact) = setup().await;
        let mut ticket = create_ticket(&db, &new_ticket(contact), Utc::now()).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(
            find_active_ticket(&db, 1, contact, 1).await.unwrap().map(|t| t.id),
            Some(ticket.id)
        );

        ticket.status = TicketStatus::Closed;
        update_ticket(&db, &ticket, Utc::now()).await.unwrap();
        assert!(find_active_ticket(&db, 1, contact, 1).await.unwrap().is_none());
        assert_eq!(
            find_latest_ticket(&db, 1, contact, 1).await.unwrap().map(|t| t.id),
            Some(ticket.id)
        );
        assert_eq!(count_active_tickets(&db, 1, contact).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_persists_automation_flags() {
        let (db, _dir, contact) = setup().await;
        let mut ticket = create_ticket(&db, &new_ticket(contact), Utc::now()).await.unwrap();
        ticket.appointment_mode = true;
        ticket.flow_execution_id = Some("exec-1".into());
        ticket.last_message = Some("oi".into());
        update_ticket(&db, &ticket, Utc::now()).await.unwrap();

        let stored = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert!(stored.appointment_mode);
        assert_eq!(stored.flow_execution_id.as_deref(), Some("exec-1"));
        assert_eq!(stored.last_message.as_deref(), Some("oi"));
        assert!(stored.updated_at >= ticket.updated_at);
    }

    #[tokio::test]
    async fn update_unknown_ticket_is_not_found() {
        let (db, _dir, contact) = setup().await;
        let mut ticket = create_ticket(&db, &new_ticket(contact), Utc::now()).await.unwrap();
        ticket.id = 404;
        let err = update_ticket(&db, &ticket, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ZapdeskError::NotFound { entity: "ticket", .. }));
    }
}
