// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ticket tracking rows, one per ticket.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{Ticket, TicketTracking};
use zapdesk_core::types::TicketId;

use crate::database::{Database, map_tr_err};

const TRACKING_COLUMNS: &str = "id, tenant_id, ticket_id, channel_id, user_id, queued_at,
    chatbot_at, rating_at, rated, rating, finished_at, created_at";

fn row_to_tracking(row: &rusqlite::Row<'_>) -> rusqlite::Result<TicketTracking> {
    Ok(TicketTracking {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        ticket_id: row.get(2)?,
        channel_id: row.get(3)?,
        user_id: row.get(4)?,
        queued_at: row.get(5)?,
        chatbot_at: row.get(6)?,
        rating_at: row.get(7)?,
        rated: row.get(8)?,
        rating: row.get(9)?,
        finished_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub async fn find_tracking(
    db: &Database,
    ticket_id: TicketId,
) -> Result<Option<TicketTracking>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {TRACKING_COLUMNS} FROM ticket_tracking WHERE ticket_id = ?1"),
                params![ticket_id],
                row_to_tracking,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Get-or-create for the ticket's tracking row; an existing row only has
/// `updated_at` touched.
pub async fn create_tracking(
    db: &Database,
    ticket: &Ticket,
    now: DateTime<Utc>,
) -> Result<TicketTracking, ZapdeskError> {
    let (tenant_id, ticket_id, channel_id, user_id) =
        (ticket.tenant_id, ticket.id, ticket.channel_id, ticket.user_id);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO ticket_tracking (tenant_id, ticket_id, channel_id, user_id,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT (ticket_id) DO UPDATE SET updated_at = excluded.updated_at
                     RETURNING {TRACKING_COLUMNS}"
                ),
                params![tenant_id, ticket_id, channel_id, user_id, now],
                row_to_tracking,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_tracking(
    db: &Database,
    tracking: &TicketTracking,
    now: DateTime<Utc>,
) -> Result<(), ZapdeskError> {
    let t = tracking.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE ticket_tracking SET user_id = ?1, queued_at = ?2, chatbot_at = ?3,
                    rating_at = ?4, rated = ?5, rating = ?6, finished_at = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    t.user_id,
                    t.queued_at,
                    t.chatbot_at,
                    t.rating_at,
                    t.rated,
                    t.rating,
                    t.finished_at,
                    now,
                    t.id,
                ],
            )?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{contacts, tickets};
    use tempfile::tempdir;
    use zapdesk_core::models::{NewContact, NewTicket};
    use zapdesk_core::types::TicketStatus;

    #[tokio::test]
    async fn create_is_idempotent_and_update_sticks() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let contact = contacts::upsert_contact(
            &db,
            &NewContact {
                tenant_id: 1,
                name: "C".into(),
                number: "55".into(),
                is_group: false,
                channel_id: None,
                profile_pic_url: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        let ticket = tickets::create_ticket(
            &db,
            &NewTicket {
                tenant_id: 1,
                contact_id: contact.id,
                channel_id: 1,
                status: TicketStatus::Pending,
                is_group: false,
                unread_messages: 0,
                integration_id: None,
                use_integration: false,
                prompt_id: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let first = create_tracking(&db, &ticket, Utc::now()).await.unwrap();
        let again = create_tracking(&db, &ticket, Utc::now()).await.unwrap();
        assert_eq!(first.id, again.id);

        let mut tracking = again;
        tracking.rating = Some(4);
        tracking.rated = true;
        tracking.finished_at = Some(Utc::now());
        update_tracking(&db, &tracking, Utc::now()).await.unwrap();

        let stored = find_tracking(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.rating, Some(4));
        assert!(stored.rated);
        assert!(stored.finished_at.is_some());
    }
}
