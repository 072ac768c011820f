// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted scheduler conversation state.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::ChatbotStateRecord;
use zapdesk_core::types::{TenantId, TicketId};

use crate::database::{Database, map_tr_err};

const STATE_COLUMNS: &str = "tenant_id, ticket_id, contact_id, step, context, expires_at, updated_at";

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatbotStateRecord> {
    Ok(ChatbotStateRecord {
        tenant_id: row.get(0)?,
        ticket_id: row.get(1)?,
        contact_id: row.get(2)?,
        step: row.get(3)?,
        context: row.get(4)?,
        expires_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub async fn load_chatbot_state(
    db: &Database,
    tenant_id: TenantId,
    ticket_id: TicketId,
) -> Result<Option<ChatbotStateRecord>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM chatbot_states WHERE tenant_id = ?1 AND ticket_id = ?2"
                ),
                params![tenant_id, ticket_id],
                row_to_state,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn save_chatbot_state(
    db: &Database,
    state: &ChatbotStateRecord,
) -> Result<(), ZapdeskError> {
    let s = state.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO chatbot_states (tenant_id, ticket_id, contact_id, step, context,
                    expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (tenant_id, ticket_id) DO UPDATE SET
                    step = excluded.step,
                    context = excluded.context,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at",
                params![
                    s.tenant_id,
                    s.ticket_id,
                    s.contact_id,
                    s.step,
                    s.context,
                    s.expires_at,
                    s.updated_at,
                ],
            )?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_chatbot_state(
    db: &Database,
    tenant_id: TenantId,
    ticket_id: TicketId,
) -> Result<(), ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM chatbot_states WHERE tenant_id = ?1 AND ticket_id = ?2",
                params![tenant_id, ticket_id],
            )?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(map_tr_err)
}

/// States whose `expires_at` is at or before `now`.
pub async fn expired_chatbot_states(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<ChatbotStateRecord>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATE_COLUMNS} FROM chatbot_states WHERE expires_at <= ?1
                 ORDER BY expires_at ASC"
            ))?;
            let rows = stmt.query_map(params![now], row_to_state)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn record(ticket_id: TicketId, expires_at: DateTime<Utc>) -> ChatbotStateRecord {
        ChatbotStateRecord {
            tenant_id: 1,
            ticket_id,
            contact_id: 9,
            step: "MENU".into(),
            context: "{}".into(),
            expires_at,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_overwrites_and_sweep_finds_expired() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("c.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc::now();

        save_chatbot_state(&db, &record(1, now - Duration::seconds(5)))
            .await
            .unwrap();
        save_chatbot_state(&db, &record(2, now + Duration::minutes(5)))
            .await
            .unwrap();

        let mut updated = record(2, now + Duration::minutes(5));
        updated.step = "DATE_SELECTION".into();
        save_chatbot_state(&db, &updated).await.unwrap();
        assert_eq!(
            load_chatbot_state(&db, 1, 2).await.unwrap().unwrap().step,
            "DATE_SELECTION"
        );

        let expired = expired_chatbot_states(&db, now).await.unwrap();
        assert_eq!(expired.iter().map(|s| s.ticket_id).collect::<Vec<_>>(), vec![1]);

        delete_chatbot_state(&db, 1, 1).await.unwrap();
        assert!(load_chatbot_state(&db, 1, 1).await.unwrap().is_none());
    }
}
