// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted domain records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{
    Ack, ChannelId, ChannelKind, ContactId, MessageId, QueueId, SessionStatus, TenantId,
    TicketId, TicketStatus, UserId,
};

/// A connected WhatsApp number belonging to a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    pub name: String,
    pub kind: ChannelKind,
    pub status: SessionStatus,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub business_account_id: Option<String>,
    /// Token echoed back during the webhook subscription handshake.
    pub verify_token: Option<String>,
    pub greeting_message: Option<String>,
    pub farewell_message: Option<String>,
    pub rating_message: Option<String>,
    pub out_of_hours_message: Option<String>,
    /// JSON weekly schedule, see `zapdesk_pipeline::hours`.
    pub schedule: Option<String>,
    pub integration_id: Option<i64>,
    pub prompt_id: Option<i64>,
    pub flow_id: Option<i64>,
    pub assistant_enabled: bool,
    pub import_contacts: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    pub name: String,
    pub greeting_message: Option<String>,
    pub order_index: i64,
    pub integration_id: Option<i64>,
    pub appointment_enabled: bool,
    pub options: Vec<QueueOption>,
}

/// Sub-menu entry shown after a queue is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOption {
    pub id: i64,
    pub queue_id: QueueId,
    pub title: String,
    pub message: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    pub name: String,
    pub number: String,
    pub is_group: bool,
    pub channel_id: Option<ChannelId>,
    pub profile_pic_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
    pub tenant_id: TenantId,
    pub name: String,
    pub number: String,
    pub is_group: bool,
    pub channel_id: Option<ChannelId>,
    pub profile_pic_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub channel_id: ChannelId,
    pub status: TicketStatus,
    pub user_id: Option<UserId>,
    pub queue_id: Option<QueueId>,
    pub chatbot: bool,
    pub is_group: bool,
    pub integration_id: Option<i64>,
    pub use_integration: bool,
    pub flow_execution_id: Option<String>,
    pub appointment_mode: bool,
    pub prompt_id: Option<i64>,
    pub unread_messages: i64,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Drops every automation marker so the ticket is handled by humans only.
    pub fn clear_automation(&mut self) {
        self.chatbot = false;
        self.use_integration = false;
        self.integration_id = None;
        self.flow_execution_id = None;
        self.appointment_mode = false;
        self.prompt_id = None;
    }

    pub fn is_closed(&self) -> bool {
        self.status == TicketStatus::Closed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub channel_id: ChannelId,
    pub status: TicketStatus,
    pub is_group: bool,
    pub unread_messages: i64,
    pub integration_id: Option<i64>,
    pub use_integration: bool,
    pub prompt_id: Option<i64>,
}

/// Timestamps of a ticket's journey, one row per ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketTracking {
    pub id: i64,
    pub tenant_id: TenantId,
    pub ticket_id: TicketId,
    pub channel_id: ChannelId,
    pub user_id: Option<UserId>,
    pub queued_at: Option<DateTime<Utc>>,
    pub chatbot_at: Option<DateTime<Utc>>,
    pub rating_at: Option<DateTime<Utc>>,
    pub rated: bool,
    pub rating: Option<i64>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub external_id: MessageId,
    pub tenant_id: TenantId,
    pub ticket_id: TicketId,
    pub contact_id: Option<ContactId>,
    pub body: String,
    pub from_me: bool,
    pub ack: Ack,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub quoted_id: Option<MessageId>,
    pub participant: Option<String>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub data_json: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation state persisted for the scheduling bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatbotStateRecord {
    pub tenant_id: TenantId,
    pub ticket_id: TicketId,
    pub contact_id: ContactId,
    pub step: String,
    /// Serialized scheduler context.
    pub context: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Professional {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    /// `HH:MM`.
    pub work_start: String,
    /// `HH:MM`.
    pub work_end: String,
    /// Comma separated ISO weekday numbers, Monday = 1.
    pub work_days: String,
}

impl Professional {
    pub fn works_on(&self, iso_weekday: u32) -> bool {
        self.work_days
            .split(',')
            .filter_map(|d| d.trim().parse::<u32>().ok())
            .any(|d| d == iso_weekday)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub ticket_id: Option<TicketId>,
    pub service_id: i64,
    pub professional_id: i64,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`.
    pub time: String,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub ticket_id: Option<TicketId>,
    pub service_id: i64,
    pub professional_id: i64,
    pub date: String,
    pub time: String,
    pub duration_minutes: i64,
}

/// An occupied interval on a professional's day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedSlot {
    pub time: String,
    pub duration_minutes: i64,
}

/// Minutes since midnight for an `HH:MM` string.
pub fn minutes_of(time: &str) -> Option<i64> {
    let (h, m) = time.split_once(':')?;
    let (h, m): (i64, i64) = (h.trim().parse().ok()?, m.trim().parse().ok()?);
    ((0..24).contains(&h) && (0..60).contains(&m)).then_some(h * 60 + m)
}

/// Formats minutes since midnight as `HH:MM`.
pub fn format_minutes(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// True when `[start, start + duration)` intersects any booking.
pub fn overlaps(booked: &[BookedSlot], start: i64, duration: i64) -> bool {
    booked.iter().any(|b| {
        minutes_of(&b.time)
            .map(|b_start| start < b_start + b.duration_minutes && b_start < start + duration)
            .unwrap_or(false)
    })
}
