// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact upserts keyed by `(tenant_id, number)`.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{Contact, NewContact};
use zapdesk_core::types::{ContactId, TenantId};

use crate::database::{Database, map_tr_err};

const CONTACT_COLUMNS: &str =
    "id, tenant_id, name, number, is_group, channel_id, profile_pic_url, created_at, updated_at";

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        number: row.get(3)?,
        is_group: row.get(4)?,
        channel_id: row.get(5)?,
        profile_pic_url: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub async fn find_contact(
    db: &Database,
    tenant_id: TenantId,
    number: &str,
) -> Result<Option<Contact>, ZapdeskError> {
    let number = number.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 AND number = ?2"),
                params![tenant_id, number],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_contact(db: &Database, id: ContactId) -> Result<Option<Contact>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Inserts the contact or refreshes name, channel and picture of the
/// existing row. An empty name or missing picture never overwrites a known one.
pub async fn upsert_contact(
    db: &Database,
    contact: &NewContact,
    now: DateTime<Utc>,
) -> Result<Contact, ZapdeskError> {
    let c = contact.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO contacts (tenant_id, name, number, is_group, channel_id,
                        profile_pic_url, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     ON CONFLICT (tenant_id, number) DO UPDATE SET
                        name = CASE WHEN excluded.name != '' THEN excluded.name ELSE contacts.name END,
                        channel_id = COALESCE(excluded.channel_id, contacts.channel_id),
                        profile_pic_url = COALESCE(excluded.profile_pic_url, contacts.profile_pic_url),
                        updated_at = excluded.updated_at
                     RETURNING {CONTACT_COLUMNS}"
                ),
                params![
                    c.tenant_id,
                    c.name,
                    c.number,
                    c.is_group,
                    c.channel_id,
                    c.profile_pic_url,
                    now,
                ],
                row_to_contact,
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Inserts only when the number is unknown for the tenant.
pub async fn insert_contact_if_absent(
    db: &Database,
    contact: &NewContact,
    now: DateTime<Utc>,
) -> Result<bool, ZapdeskError> {
    let c = contact.clone();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "INSERT INTO contacts (tenant_id, name, number, is_group, channel_id,
                    profile_pic_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT (tenant_id, number) DO NOTHING",
                params![
                    c.tenant_id,
                    c.name,
                    c.number,
                    c.is_group,
                    c.channel_id,
                    c.profile_pic_url,
                    now,
                ],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
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
        (db, dir)
    }

    fn new_contact(number: &str, name: &str) -> NewContact {
        NewContact {
            tenant_id: 1,
            name: name.to_string(),
            number: number.to_string(),
            is_group: false,
            channel_id: Some(1),
            profile_pic_url: None,
        }
    }

    #[tokio::test]
    async fn upsert_never_duplicates() {
        let (db, _dir) = setup_db().await;
        let first = upsert_contact(&db, &new_contact("5511999990000", "Ana"), Utc::now())
            .await
            .unwrap();
        let second = upsert_contact(&db, &new_contact("5511999990000", "Ana Maria"), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Ana Maria");
    }

    #[tokio::test]
    async fn empty_name_keeps_known_name() {
        let (db, _dir) = setup_db().await;
        let mut c = new_contact("5511988887777", "Bruno");
        c.profile_pic_url = Some("https://pics/b.jpg".into());
        upsert_contact(&db, &c, Utc::now()).await.unwrap();

        let refreshed = upsert_contact(&db, &new_contact("5511988887777", ""), Utc::now())
            .await
            .unwrap();
        assert_eq!(refreshed.name, "Bruno");
        assert_eq!(refreshed.profile_pic_url.as_deref(), Some("https://pics/b.jpg"));
    }

    #[tokio::test]
    async fn same_number_is_separate_per_tenant() {
        let (db, _dir) = setup_db().await;
        let a = upsert_contact(&db, &new_contact("551100", "A"), Utc::now()).await.unwrap();
        let mut other = new_contact("551100", "A");
        other.tenant_id = 2;
        let b = upsert_contact(&db, &other, Utc::now()).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(find_contact(&db, 2, "551100").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn insert_if_absent_skips_existing() {
        let (db, _dir) = setup_db().await;
        assert!(insert_contact_if_absent(&db, &new_contact("55", "X"), Utc::now()).await.unwrap());
        assert!(!insert_contact_if_absent(&db, &new_contact("55", "Y"), Utc::now()).await.unwrap());
        let stored = find_contact(&db, 1, "55").await.unwrap().unwrap();
        assert_eq!(stored.name, "X");
    }
}
