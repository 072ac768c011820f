// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Administrative inserts: channels, queues and the scheduling catalog.
//!
//! The inbound pipeline only reads these tables; they are written by the
//! CLI and by test fixtures.

use rusqlite::params;
use zapdesk_core::ZapdeskError;
use zapdesk_core::types::{ChannelId, ChannelKind, QueueId, SessionStatus, TenantId};

use crate::database::{Database, map_tr_err};

/// Fields accepted when registering a channel.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub tenant_id: TenantId,
    pub name: String,
    pub kind: ChannelKind,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub business_account_id: Option<String>,
    pub verify_token: Option<String>,
    pub greeting_message: Option<String>,
    pub farewell_message: Option<String>,
    pub rating_message: Option<String>,
    pub out_of_hours_message: Option<String>,
    pub schedule: Option<String>,
    pub integration_id: Option<i64>,
    pub prompt_id: Option<i64>,
    pub flow_id: Option<i64>,
    pub assistant_enabled: bool,
    pub import_contacts: bool,
}

impl NewChannel {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            kind,
            access_token: None,
            phone_number_id: None,
            business_account_id: None,
            verify_token: None,
            greeting_message: None,
            farewell_message: None,
            rating_message: None,
            out_of_hours_message: None,
            schedule: None,
            integration_id: None,
            prompt_id: None,
            flow_id: None,
            assistant_enabled: false,
            import_contacts: false,
        }
    }
}

pub async fn insert_channel(db: &Database, channel: &NewChannel) -> Result<ChannelId, ZapdeskError> {
    let c = channel.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO channels (tenant_id, name, kind, status, access_token, phone_number_id,
                    business_account_id, verify_token, greeting_message, farewell_message,
                    rating_message, out_of_hours_message, schedule, integration_id, prompt_id,
                    flow_id, assistant_enabled, import_contacts, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, 1)",
                params![
                    c.tenant_id,
                    c.name,
                    c.kind.to_string(),
                    SessionStatus::Disconnected.to_string(),
                    c.access_token,
                    c.phone_number_id,
                    c.business_account_id,
                    c.verify_token,
                    c.greeting_message,
                    c.farewell_message,
                    c.rating_message,
                    c.out_of_hours_message,
                    c.schedule,
                    c.integration_id,
                    c.prompt_id,
                    c.flow_id,
                    c.assistant_enabled,
                    c.import_contacts,
                ],
            )?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_channel_enabled(
    db: &Database,
    id: ChannelId,
    enabled: bool,
) -> Result<bool, ZapdeskError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE channels SET enabled = ?1 WHERE id = ?2",
                params![enabled, id],
            )?;
            Ok::<_, rusqlite::Error>(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[derive(Debug, Clone)]
pub struct NewQueue {
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    pub name: String,
    pub greeting_message: Option<String>,
    pub order_index: i64,
    pub integration_id: Option<i64>,
    pub appointment_enabled: bool,
}

impl NewQueue {
    pub fn new(
        tenant_id: TenantId,
        channel_id: ChannelId,
        name: impl Into<String>,
        order_index: i64,
    ) -> Self {
        Self {
            tenant_id,
            channel_id,
            name: name.into(),
            greeting_message: None,
            order_index,
            integration_id: None,
            appointment_enabled: false,
        }
    }
}

pub async fn insert_queue(db: &Database, queue: &NewQueue) -> Result<QueueId, ZapdeskError> {
    let q = queue.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO queues (tenant_id, channel_id, name, greeting_message, order_index,
                    integration_id, appointment_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    q.tenant_id,
                    q.channel_id,
                    q.name,
                    q.greeting_message,
                    q.order_index,
                    q.integration_id,
                    q.appointment_enabled,
                ],
            )?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn insert_queue_option(
    db: &Database,
    queue_id: QueueId,
    title: &str,
    message: Option<&str>,
    order_index: i64,
) -> Result<i64, ZapdeskError> {
    let title = title.to_string();
    let message = message.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO queue_options (queue_id, title, message, order_index)
                 VALUES (?1, ?2, ?3, ?4)",
                params![queue_id, title, message, order_index],
            )?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn insert_service(
    db: &Database,
    tenant_id: TenantId,
    name: &str,
    duration_minutes: i64,
) -> Result<i64, ZapdeskError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO services (tenant_id, name, duration_minutes) VALUES (?1, ?2, ?3)",
                params![tenant_id, name, duration_minutes],
            )?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Inserts a professional and links them to `service_ids`.
pub async fn insert_professional(
    db: &Database,
    tenant_id: TenantId,
    name: &str,
    work_start: &str,
    work_end: &str,
    work_days: &str,
    service_ids: &[i64],
) -> Result<i64, ZapdeskError> {
    let name = name.to_string();
    let work_start = work_start.to_string();
    let work_end = work_end.to_string();
    let work_days = work_days.to_string();
    let service_ids = service_ids.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO professionals (tenant_id, name, work_start, work_end, work_days)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant_id, name, work_start, work_end, work_days],
            )?;
            let id = tx.last_insert_rowid();
            for service_id in service_ids {
                tx.execute(
                    "INSERT INTO professional_services (professional_id, service_id) VALUES (?1, ?2)",
                    params![id, service_id],
                )?;
            }
            tx.commit()?;
            Ok::<_, rusqlite::Error>(id)
        })
        .await
        .map_err(map_tr_err)
}
