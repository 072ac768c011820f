// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message rows, unique per `(tenant_id, external_id)`.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::StoredMessage;
use zapdesk_core::types::{Ack, MessageId, TenantId, TicketId};

use crate::database::{Database, map_tr_err};

const MESSAGE_COLUMNS: &str = "external_id, tenant_id, ticket_id, contact_id, body, from_me, ack,
    media_type, media_url, quoted_id, participant, is_edited, is_deleted, data_json, created_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        external_id: MessageId(row.get(0)?),
        tenant_id: row.get(1)?,
        ticket_id: row.get(2)?,
        contact_id: row.get(3)?,
        body: row.get(4)?,
        from_me: row.get(5)?,
        ack: Ack::from_code(row.get(6)?),
        media_type: row.get(7)?,
        media_url: row.get(8)?,
        quoted_id: row.get::<_, Option<String>>(9)?.map(MessageId),
        participant: row.get(10)?,
        is_edited: row.get(11)?,
        is_deleted: row.get(12)?,
        data_json: row.get(13)?,
        created_at: row.get(14)?,
    })
}

pub async fn message_exists(
    db: &Database,
    tenant_id: TenantId,
    id: &MessageId,
) -> Result<bool, ZapdeskError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE tenant_id = ?1 AND external_id = ?2)",
                params![tenant_id, id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_message(
    db: &Database,
    tenant_id: TenantId,
    id: &MessageId,
) -> Result<Option<StoredMessage>, ZapdeskError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE tenant_id = ?1 AND external_id = ?2"
                ),
                params![tenant_id, id],
                row_to_message,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Returns false when the external id was already stored for the tenant.
pub async fn insert_message(db: &Database, msg: &StoredMessage) -> Result<bool, ZapdeskError> {
    let m = msg.clone();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "INSERT INTO messages (external_id, tenant_id, ticket_id, contact_id, body, from_me,
                    ack, media_type, media_url, quoted_id, participant, is_edited, is_deleted,
                    data_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
                 ON CONFLICT (tenant_id, external_id) DO NOTHING",
                params![
                    m.external_id.0,
                    m.tenant_id,
                    m.ticket_id,
                    m.contact_id,
                    m.body,
                    m.from_me,
                    m.ack.code(),
                    m.media_type,
                    m.media_url,
                    m.quoted_id.map(|q| q.0),
                    m.participant,
                    m.is_edited,
                    m.is_deleted,
                    m.data_json,
                    m.created_at,
                ],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Rewrites the body in place and flags the row as edited.
pub async fn update_message_body(
    db: &Database,
    tenant_id: TenantId,
    id: &MessageId,
    body: &str,
    now: DateTime<Utc>,
) -> Result<bool, ZapdeskError> {
    let id = id.0.clone();
    let body = body.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE messages SET body = ?1, is_edited = 1, updated_at = ?2
                 WHERE tenant_id = ?3 AND external_id = ?4",
                params![body, now, tenant_id, id],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Applies `ack` only when it is above the stored code.
pub async fn update_message_ack(
    db: &Database,
    tenant_id: TenantId,
    id: &MessageId,
    ack: Ack,
    now: DateTime<Utc>,
) -> Result<bool, ZapdeskError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE messages SET ack = ?1, updated_at = ?2
                 WHERE tenant_id = ?3 AND external_id = ?4 AND ack < ?1",
                params![ack.code(), now, tenant_id, id],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_message_deleted(
    db: &Database,
    tenant_id: TenantId,
    id: &MessageId,
    now: DateTime<Utc>,
) -> Result<bool, ZapdeskError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE messages SET is_deleted = 1, updated_at = ?1
                 WHERE tenant_id = ?2 AND external_id = ?3 AND is_deleted = 0",
                params![now, tenant_id, id],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Messages of a ticket, oldest first.
pub async fn list_messages(
    db: &Database,
    ticket_id: TicketId,
) -> Result<Vec<StoredMessage>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE ticket_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![ticket_id], row_to_message)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        // Foreign keys require a ticket row.
        db.connection()
            .call(|conn| {
                conn.execute_batch(
                    "INSERT INTO contacts (id, tenant_id, name, number, created_at, updated_at)
                        VALUES (1, 1, 'c', '55', '2026-01-01', '2026-01-01');
                     INSERT INTO tickets (id, tenant_id, contact_id, channel_id, status, created_at, updated_at)
                        VALUES (1, 1, 1, 1, 'pending', '2026-01-01', '2026-01-01');",
                )
            })
            .await
            .unwrap();
        (db, dir)
    }

    fn stored(id: &str) -> StoredMessage {
        StoredMessage {
            external_id: MessageId(id.to_string()),
            tenant_id: 1,
            ticket_id: 1,
            contact_id: Some(1),
            body: "hello".into(),
            from_me: false,
            ack: Ack::Unknown,
            media_type: None,
            media_url: None,
            quoted_id: None,
            participant: None,
            is_edited: false,
            is_deleted: false,
            data_json: "{}".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_ignored() {
        let (db, _dir) = setup_db().await;
        assert!(insert_message(&db, &stored("wamid.1")).await.unwrap());
        assert!(!insert_message(&db, &stored("wamid.1")).await.unwrap());
        assert_eq!(list_messages(&db, 1).await.unwrap().len(), 1);
        assert!(message_exists(&db, 1, &MessageId("wamid.1".into())).await.unwrap());
        assert!(!message_exists(&db, 2, &MessageId("wamid.1".into())).await.unwrap());
    }

    #[tokio::test]
    async fn ack_never_moves_backwards() {
        let (db, _dir) = setup_db().await;
        insert_message(&db, &stored("m")).await.unwrap();
        let id = MessageId("m".into());

        assert!(update_message_ack(&db, 1, &id, Ack::Read, Utc::now()).await.unwrap());
        assert!(!update_message_ack(&db, 1, &id, Ack::Delivered, Utc::now()).await.unwrap());
        let msg = get_message(&db, 1, &id).await.unwrap().unwrap();
        assert_eq!(msg.ack, Ack::Read);
    }

    #[tokio::test]
    async fn edit_updates_in_place() {
        let (db, _dir) = setup_db().await;
        insert_message(&db, &stored("e")).await.unwrap();
        let id = MessageId("e".into());

        assert!(update_message_body(&db, 1, &id, "edited", Utc::now()).await.unwrap());
        assert!(!update_message_body(&db, 1, &MessageId("unknown".into()), "x", Utc::now()).await.unwrap());

        let all = list_messages(&db, 1).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body, "edited");
        assert!(all[0].is_edited);
    }

    #[tokio::test]
    async fn delete_marks_once() {
        let (db, _dir) = setup_db().await;
        insert_message(&db, &stored("d")).await.unwrap();
        let id = MessageId("d".into());
        assert!(mark_message_deleted(&db, 1, &id, Utc::now()).await.unwrap());
        assert!(!mark_message_deleted(&db, 1, &id, Utc::now()).await.unwrap());
    }
}
