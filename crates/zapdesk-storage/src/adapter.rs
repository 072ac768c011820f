// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of [`StorageAdapter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use zapdesk_config::model::StorageConfig;
use zapdesk_core::models::{
    Appointment, BookedSlot, Channel, ChatbotStateRecord, Contact, NewAppointment, NewContact,
    NewTicket, Professional, Queue, Service, StoredMessage, Ticket, TicketTracking,
};
use zapdesk_core::types::{
    Ack, AdapterType, ChannelId, ContactId, HealthStatus, MessageId, QueueId, SessionStatus,
    TenantId, TicketId,
};
use zapdesk_core::{
    Adapter, Clock, RoomOwners, SharedClock, StorageAdapter, SystemClock, ZapdeskError,
};

use crate::database::{self, Database};
use crate::queries;

/// SQLite-backed storage.
///
/// The database is opened by [`StorageAdapter::initialize`]; every other
/// call fails until then. Row timestamps come from the storage clock.
pub struct SqliteStorage {
    config: StorageConfig,
    clock: SharedClock,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_clock(config, std::sync::Arc::new(SystemClock))
    }

    pub fn with_clock(config: StorageConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            db: OnceCell::new(),
        }
    }

    /// The open database, for administrative queries outside the trait.
    pub fn database(&self) -> Result<&Database, ZapdeskError> {
        self.db.get().ok_or_else(|| ZapdeskError::Storage {
            source: "storage not initialized, call initialize() first".into(),
        })
    }
}

#[async_trait]
impl Adapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, ZapdeskError> {
        self.database()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch("SELECT 1;") })
            .await
            .map_err(database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ZapdeskError> {
        if let Some(db) = self.db.get() {
            database::checkpoint(db.connection()).await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), ZapdeskError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| ZapdeskError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "sqlite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), ZapdeskError> {
        database::checkpoint(self.database()?.connection()).await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, ZapdeskError> {
        queries::channels::list_channels(self.database()?).await
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, ZapdeskError> {
        queries::channels::get_channel(self.database()?, id).await
    }

    async fn update_channel_status(
        &self,
        id: ChannelId,
        status: SessionStatus,
    ) -> Result<bool, ZapdeskError> {
        queries::channels::update_channel_status(self.database()?, id, status).await
    }

    async fn list_queues(&self, channel_id: ChannelId) -> Result<Vec<Queue>, ZapdeskError> {
        queries::channels::list_queues(self.database()?, channel_id).await
    }

    async fn find_contact(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> Result<Option<Contact>, ZapdeskError> {
        queries::contacts::find_contact(self.database()?, tenant_id, number).await
    }

    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>, ZapdeskError> {
        queries::contacts::get_contact(self.database()?, id).await
    }

    async fn upsert_contact(&self, contact: &NewContact) -> Result<Contact, ZapdeskError> {
        queries::contacts::upsert_contact(self.database()?, contact, self.clock.now()).await
    }

    async fn insert_contact_if_absent(
        &self,
        contact: &NewContact,
    ) -> Result<bool, ZapdeskError> {
        queries::contacts::insert_contact_if_absent(
            self.database()?,
            contact,
            self.clock.now(),
        )
        .await
    }

    async fn find_active_ticket(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, ZapdeskError> {
        queries::tickets::find_active_ticket(self.database()?, tenant_id, contact_id, channel_id)
            .await
    }

    async fn find_latest_ticket(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, ZapdeskError> {
        queries::tickets::find_latest_ticket(self.database()?, tenant_id, contact_id, channel_id)
            .await
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, ZapdeskError> {
        queries::tickets::get_ticket(self.database()?, id).await
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket, ZapdeskError> {
        queries::tickets::create_ticket(self.database()?, ticket, self.clock.now()).await
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), ZapdeskError> {
        queries::tickets::update_ticket(self.database()?, ticket, self.clock.now()).await
    }

    async fn count_active_tickets(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
    ) -> Result<i64, ZapdeskError> {
        queries::tickets::count_active_tickets(self.database()?, tenant_id, contact_id).await
    }

    async fn find_tracking(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<TicketTracking>, ZapdeskError> {
        queries::tracking::find_tracking(self.database()?, ticket_id).await
    }

    async fn create_tracking(&self, ticket: &Ticket) -> Result<TicketTracking, ZapdeskError> {
        queries::tracking::create_tracking(self.database()?, ticket, self.clock.now()).await
    }

    async fn update_tracking(&self, tracking: &TicketTracking) -> Result<(), ZapdeskError> {
        queries::tracking::update_tracking(self.database()?, tracking, self.clock.now()).await
    }

    async fn message_exists(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<bool, ZapdeskError> {
        queries::messages::message_exists(self.database()?, tenant_id, id).await
    }

    async fn get_message(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<Option<StoredMessage>, ZapdeskError> {
        queries::messages::get_message(self.database()?, tenant_id, id).await
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<bool, ZapdeskError> {
        queries::messages::insert_message(self.database()?, message).await
    }

    async fn update_message_body(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
        body: &str,
    ) -> Result<bool, ZapdeskError> {
        queries::messages::update_message_body(
            self.database()?,
            tenant_id,
            id,
            body,
            self.clock.now(),
        )
        .await
    }

    async fn update_message_ack(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
        ack: Ack,
    ) -> Result<bool, ZapdeskError> {
        queries::messages::update_message_ack(
            self.database()?,
            tenant_id,
            id,
            ack,
            self.clock.now(),
        )
        .await
    }

    async fn mark_message_deleted(
        &self,
        tenant_id: TenantId,
        id: &MessageId,
    ) -> Result<bool, ZapdeskError> {
        queries::messages::mark_message_deleted(
            self.database()?,
            tenant_id,
            id,
            self.clock.now(),
        )
        .await
    }

    async fn list_messages(
        &self,
        ticket_id: TicketId,
    ) -> Result<Vec<StoredMessage>, ZapdeskError> {
        queries::messages::list_messages(self.database()?, ticket_id).await
    }

    async fn load_chatbot_state(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
    ) -> Result<Option<ChatbotStateRecord>, ZapdeskError> {
        queries::chatbot::load_chatbot_state(self.database()?, tenant_id, ticket_id).await
    }

    async fn save_chatbot_state(&self, state: &ChatbotStateRecord) -> Result<(), ZapdeskError> {
        queries::chatbot::save_chatbot_state(self.database()?, state).await
    }

    async fn delete_chatbot_state(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
    ) -> Result<(), ZapdeskError> {
        queries::chatbot::delete_chatbot_state(self.database()?, tenant_id, ticket_id).await
    }

    async fn expired_chatbot_states(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatbotStateRecord>, ZapdeskError> {
        queries::chatbot::expired_chatbot_states(self.database()?, now).await
    }

    async fn list_services(&self, tenant_id: TenantId) -> Result<Vec<Service>, ZapdeskError> {
        queries::scheduling::list_services(self.database()?, tenant_id).await
    }

    async fn list_professionals(
        &self,
        tenant_id: TenantId,
        service_id: i64,
    ) -> Result<Vec<Professional>, ZapdeskError> {
        queries::scheduling::list_professionals(self.database()?, tenant_id, service_id).await
    }

    async fn booked_slots(
        &self,
        professional_id: i64,
        date: &str,
    ) -> Result<Vec<BookedSlot>, ZapdeskError> {
        queries::scheduling::booked_slots(self.database()?, professional_id, date).await
    }

    async fn book_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Appointment, ZapdeskError> {
        queries::scheduling::book_appointment(self.database()?, appointment, self.clock.now()).await
    }

    async fn list_upcoming_appointments(
        &self,
        tenant_id: TenantId,
        contact_id: ContactId,
        from_date: &str,
    ) -> Result<Vec<Appointment>, ZapdeskError> {
        queries::scheduling::list_upcoming_appointments(
            self.database()?,
            tenant_id,
            contact_id,
            from_date,
        )
        .await
    }

    async fn cancel_appointment(
        &self,
        tenant_id: TenantId,
        appointment_id: i64,
    ) -> Result<bool, ZapdeskError> {
        queries::scheduling::cancel_appointment(self.database()?, tenant_id, appointment_id).await
    }
}

#[async_trait]
impl RoomOwners for SqliteStorage {
    async fn ticket_tenant(&self, ticket_id: TicketId) -> Result<Option<TenantId>, ZapdeskError> {
        Ok(queries::tickets::get_ticket(self.database()?, ticket_id)
            .await?
            .map(|t| t.tenant_id))
    }

    async fn queue_tenant(&self, queue_id: QueueId) -> Result<Option<TenantId>, ZapdeskError> {
        queries::channels::queue_tenant(self.database()?, queue_id).await
    }
}
