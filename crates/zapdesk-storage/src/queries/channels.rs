// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel and queue reads plus channel status writes.

use rusqlite::{OptionalExtension, params};
use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{Channel, Queue, QueueOption};
use zapdesk_core::types::{ChannelId, QueueId, SessionStatus, TenantId};

use crate::database::{Database, map_tr_err};
use crate::queries::get_enum;

const CHANNEL_COLUMNS: &str = "id, tenant_id, name, kind, status, access_token, phone_number_id,
    business_account_id, verify_token, greeting_message, farewell_message, rating_message,
    out_of_hours_message, schedule, integration_id, prompt_id, flow_id, assistant_enabled,
    import_contacts, enabled";

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        kind: get_enum(row, 3)?,
        status: get_enum(row, 4)?,
        access_token: row.get(5)?,
        phone_number_id: row.get(6)?,
        business_account_id: row.get(7)?,
        verify_token: row.get(8)?,
        greeting_message: row.get(9)?,
        farewell_message: row.get(10)?,
        rating_message: row.get(11)?,
        out_of_hours_message: row.get(12)?,
        schedule: row.get(13)?,
        integration_id: row.get(14)?,
        prompt_id: row.get(15)?,
        flow_id: row.get(16)?,
        assistant_enabled: row.get(17)?,
        import_contacts: row.get(18)?,
        enabled: row.get(19)?,
    })
}

pub async fn list_channels(db: &Database) -> Result<Vec<Channel>, ZapdeskError> {
    db.connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id"))?;
            let rows = stmt.query_map([], row_to_channel)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_channel(db: &Database, id: ChannelId) -> Result<Option<Channel>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                params![id],
                row_to_channel,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_channel_status(
    db: &Database,
    id: ChannelId,
    status: SessionStatus,
) -> Result<bool, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE channels SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Queues of a channel ordered by `order_index, id`, options attached.
pub async fn list_queues(db: &Database, channel_id: ChannelId) -> Result<Vec<Queue>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, channel_id, name, greeting_message, order_index,
                        integration_id, appointment_enabled
                 FROM queues WHERE channel_id = ?1
                 ORDER BY order_index ASC, id ASC",
            )?;
            let mut queues = stmt
                .query_map(params![channel_id], |row| {
                    Ok(Queue {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        channel_id: row.get(2)?,
                        name: row.get(3)?,
                        greeting_message: row.get(4)?,
                        order_index: row.get(5)?,
                        integration_id: row.get(6)?,
                        appointment_enabled: row.get(7)?,
                        options: Vec::new(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut opt_stmt = conn.prepare(
                "SELECT id, queue_id, title, message, order_index
                 FROM queue_options WHERE queue_id = ?1
                 ORDER BY order_index ASC, id ASC",
            )?;
            for queue in &mut queues {
                queue.options = opt_stmt
                    .query_map(params![queue.id], |row| {
                        Ok(QueueOption {
                            id: row.get(0)?,
                            queue_id: row.get(1)?,
                            title: row.get(2)?,
                            message: row.get(3)?,
                            order_index: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            Ok::<_, rusqlite::Error>(queues)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn queue_tenant(db: &Database, id: QueueId) -> Result<Option<TenantId>, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            conn.query_row("SELECT tenant_id FROM queues WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
        .map_err(map_tr_err)
}
