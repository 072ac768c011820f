// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence seam for the helpdesk domain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ZapdeskError;
use crate::models::{
    Appointment, BookedSlot, Channel, ChatbotStateRecord, Contact, NewAppointment, NewContact,
    NewTicket, Professional, Queue, Service, StoredMessage, Ticket, TicketTracking,
};
use crate::traits::adapter::Adapter;
use crate::types::{
    Ack, ChannelId, ContactId, MessageId, SessionStatus, TenantId, TicketId,
};

/// Storage backend used by the pipeline, the router and the health monitor.
///
/// Queries that change a single row return whether a row was affected so
/// callers can tell "unknown id" apart from success.
#[async_trait]
pub trait StorageAdapter: Adapter {
    /// Runs migrations and opens connections.
    async fn initialize(&self) -> Result<(), ZapdeskError>;

    async fn close(&self) -> Result<(), ZapdeskError>;

    // --- channels and queues ---

    async fn list_channels(&self) -> Result<Vec<Channel>, ZapdeskError>;

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, ZapdeskError>;

    async fn update_channel_status(
        &self,
        id: ChannelId,
        status: SessionStatus,
    ) -> Result<bool, ZapdeskError>;

    /// Queues of a channel with their options, ordered by `order_index, id`.
    async fn list_queues(&self, channel_id: ChannelId) -> Result<Vec<Queue>, ZapdeskError>;

    // --- contacts ---

    async fn find_contact(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> Result<Option<Contact>, ZapdeskError>;

    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>, ZapdeskError>;

    /// Inserts or refreshes the contact keyed by `(tenant, number)`.
    async fn upsert_contact(&self, contact: &NewContact) -> Result<Contact, ZapdeskError>;

    /// Inserts only when `(tenant, number)` is unknown. Returns true on insert.
    async fn insert_contact_if_absent(&self, contact: &NewContact)
    -> Result<bool, ZapdeskError>;

    // --- tickets ---

    /// Latest ticket of the contact on the channel that is not closed.
    async fn find_active_ticket(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, ZapdeskError>;

    /// Latest ticket of the contact on the channel regardless of status.
    async fn find_latest_ticket(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, ZapdeskError>;

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, ZapdeskError>;

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket, ZapdeskError>;

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), ZapdeskError>;

    async fn count_active_tickets(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
    ) -> Result<i64, ZapdeskError>;

    // --- tracking ---

    async fn find_tracking(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<TicketTracking>, ZapdeskError>;

    async fn create_tracking(&self, ticket: &Ticket) -> Result<TicketTracking, ZapdeskError>;

    async fn update_tracking(&self, tracking: &TicketTracking) -> Result<(), ZapdeskError>;

    // --- messages ---

    async fn message_exists(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<bool, ZapdeskError>;

    async fn get_message(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<Option<StoredMessage>, ZapdeskError>;

    /// Inserts unless `(tenant, external_id)` already exists. Returns true on insert.
    async fn insert_message(&self, message: &StoredMessage) -> Result<bool, ZapdeskError>;

    async fn update_message_body(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
        body: &str,
    ) -> Result<bool, ZapdeskError>;

    /// Stores `ack` only when it is higher than the stored value.
    async fn update_message_ack(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
        ack: Ack,
    ) -> Result<bool, ZapdeskError>;

    async fn mark_message_deleted(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<bool, ZapdeskError>;

    async fn list_messages(&self, ticket_id: TicketId)
    -> Result<Vec<StoredMessage>, ZapdeskError>;

    // --- chatbot state ---

    async fn load_chatbot_state(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
    ) -> Result<Option<ChatbotStateRecord>, ZapdeskError>;

    async fn save_chatbot_state(&self, state: &ChatbotStateRecord) -> Result<(), ZapdeskError>;

    async fn delete_chatbot_state(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
    ) -> Result<(), ZapdeskError>;

    async fn expired_chatbot_states(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatbotStateRecord>, ZapdeskError>;

    // --- scheduling ---

    async fn list_services(&self, tenant_id: TenantId) -> Result<Vec<Service>, ZapdeskError>;

    /// Professionals able to perform the service.
    async fn list_professionals(
        &self,
        tenant_id: TenantId,
        service_id: i64,
    ) -> Result<Vec<Professional>, ZapdeskError>;

    /// Non-cancelled bookings of a professional on `date` (`YYYY-MM-DD`).
    async fn booked_slots(
        &self,
        professional_id: i64,
        date: &str,
    ) -> Result<Vec<BookedSlot>, ZapdeskError>;

    /// Creates and confirms an appointment in one transaction.
    ///
    /// Returns [`ZapdeskError::Conflict`] when the slot overlaps a booking.
    async fn book_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Appointment, ZapdeskError>;

    /// Non-cancelled appointments of a contact dated on or after `from_date`.
    async fn list_upcoming_appointments(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
        from_date: &str,
    ) -> Result<Vec<Appointment>, ZapdeskError>;

    async fn cancel_appointment(
        &self,
        tenant_id: TenantId,
        appointment_id: i64,
    ) -> Result<bool, ZapdeskError>;
}
