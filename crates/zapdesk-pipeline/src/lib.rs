// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message pipeline for Zapdesk.
//!
//! Every wire event a transport produces lands in [`Pipeline::handle_event`].
//! Messages go through validation, de-duplication, contact and ticket
//! resolution, persistence and finally the dispatch [`router`]. Acks, group
//! and contact updates and connection changes are applied directly.
//!
//! [`Pipeline::run`] consumes a channel-tagged event stream with one worker
//! per channel, so events of a channel are handled in arrival order while
//! channels progress independently.

pub mod acks;
pub mod chatbot;
pub mod collaborators;
pub mod deps;
pub mod events;
pub mod health;
pub mod hours;
pub mod integrations;
pub mod kv;
pub mod locks;
pub mod media;
pub mod notices;
pub mod outbound;
pub mod persistence;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod shutdown;
pub mod state_cache;

#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use zapdesk_config::model::{ChatbotConfig, ZapdeskConfig};
use zapdesk_core::error::is_fatal_auth_code;
use zapdesk_core::models::{Channel, NewContact};
use zapdesk_core::types::{
    ChannelId, ContactUpdate, GroupUpdate, InboundMessage, SessionStatus, TicketId, WireEvent,
    normalize_number,
};
use zapdesk_core::{KeyValueStore, MediaStore, RuleEngine, ZapdeskError};
use zapdesk_whatsapp::ChannelEvent;

pub use collaborators::Collaborators;
pub use deps::PipelineDeps;
pub use router::DispatchOutcome;

use crate::acks::AckApplier;
use crate::chatbot::QueueMenu;
use crate::health::HealthMonitor;
use crate::notices::NoticeCache;
use crate::outbound::Outbound;
use crate::persistence::MessageStore;
use crate::resolver::{Resolver, TicketRequest};
use crate::router::{Inbound, Router};
use crate::scheduler::AppointmentScheduler;
use crate::state_cache::ChatbotStateCache;

const DEFAULT_RATING_MESSAGE: &str = "Por favor, avalie nosso atendimento de 1 a 5.";
const WORKER_QUEUE: usize = 256;
const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Unrecognized message shape; nothing was touched.
    Dropped,
    /// The external id was already stored or is being processed.
    Duplicate,
    /// An edit; `true` when the original was found and rewritten.
    Edited(bool),
    Stored {
        ticket_id: TicketId,
        created: bool,
        /// `None` for own and imported messages, which are never dispatched.
        dispatch: Option<DispatchOutcome>,
    },
    /// An unexpected error; already logged.
    Failed,
}

pub struct Pipeline {
    deps: PipelineDeps,
    store: Arc<MessageStore>,
    acks: AckApplier,
    resolver: Resolver,
    router: Router,
    outbound: Arc<Outbound>,
    scheduler: Arc<AppointmentScheduler>,
    health: Arc<HealthMonitor>,
    rules: Arc<dyn RuleEngine>,
    chatbot: ChatbotConfig,
}

impl Pipeline {
    pub fn new(
        deps: PipelineDeps,
        config: &ZapdeskConfig,
        collaborators: Collaborators,
        media: Option<Arc<dyn MediaStore>>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let chatbot = config.chatbot.clone();
        let media_timeout = Duration::from_secs(config.whatsapp.request_timeout_secs.max(1));
        let store = Arc::new(MessageStore::new(deps.clone(), media, media_timeout));
        let outbound = Arc::new(Outbound::new(deps.clone(), Arc::clone(&store)));
        let notices = Arc::new(NoticeCache::new(
            deps.clock.clone(),
            chatbot.notice_window_secs,
            chatbot.notice_capacity,
        ));
        let states = Arc::new(ChatbotStateCache::new(
            deps.storage.clone(),
            deps.clock.clone(),
            chatbot.state_ttl_secs,
        ));
        let scheduler = Arc::new(AppointmentScheduler::new(
            deps.clone(),
            Arc::clone(&outbound),
            states,
            collaborators.flows.clone(),
            chatbot.clone(),
        ));
        let menu = QueueMenu::new(deps.clone(), Arc::clone(&outbound), Arc::clone(&notices));
        let rules = collaborators.rules.clone();
        let router = Router::new(
            deps.clone(),
            collaborators,
            Arc::clone(&outbound),
            menu,
            Arc::clone(&scheduler),
            notices,
            chatbot.clone(),
        );

        Self {
            acks: AckApplier::new(deps.clone(), Arc::clone(&store)),
            resolver: Resolver::new(deps.clone(), kv, config.ticket.clone()),
            health: Arc::new(HealthMonitor::new(deps.clone(), config.health.clone())),
            deps,
            store,
            router,
            outbound,
            scheduler,
            rules,
            chatbot,
        }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn scheduler(&self) -> &Arc<AppointmentScheduler> {
        &self.scheduler
    }

    /// Runs one inbound message through the pipeline. Never fails; errors are
    /// logged and reported as [`PipelineOutcome::Failed`].
    pub async fn handle_message(
        &self,
        channel_id: ChannelId,
        msg: InboundMessage,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let external_id = msg.external_id.clone();
        let outcome = match self.process(channel_id, msg).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(channel_id, external_id = %external_id, error = %e, "inbound message failed");
                PipelineOutcome::Failed
            }
        };
        zapdesk_prometheus::record_latency(started.elapsed().as_secs_f64());
        outcome
    }

    async fn process(
        &self,
        channel_id: ChannelId,
        msg: InboundMessage,
    ) -> Result<PipelineOutcome, ZapdeskError> {
        let channel = self.channel(channel_id).await?;
        let tenant_id = channel.tenant_id;

        if !msg.is_valid() {
            debug!(tenant_id, channel_id, external_id = %msg.external_id, kind = %msg.message_type, "unsupported message dropped");
            return Ok(PipelineOutcome::Dropped);
        }
        zapdesk_prometheus::record_inbound(&msg.message_type.to_string());

        if msg.is_edit() {
            return Ok(PipelineOutcome::Edited(
                self.store.apply_edit(tenant_id, &msg).await?,
            ));
        }

        // held until dispatch finishes so a concurrent replay stays a no-op
        let Some(claim) = self.store.claim(tenant_id, &msg.external_id).await? else {
            debug!(tenant_id, external_id = %msg.external_id, "duplicate message skipped");
            zapdesk_prometheus::record_duplicate();
            return Ok(PipelineOutcome::Duplicate);
        };

        let media = match &msg.media {
            Some(media) => self.store.fetch_media(&channel, media).await,
            None => None,
        };

        let contact = self.resolver.resolve_contact(&channel, &msg).await?;
        let resolved = self
            .resolver
            .resolve_ticket(&contact, &channel, TicketRequest::from(&msg))
            .await?;
        let mut ticket = resolved.ticket;
        // tracking is not needed to store the message
        if let Err(e) = self.resolver.resolve_tracking(&ticket).await {
            warn!(ticket_id = ticket.id, error = %e, "ticket tracking unavailable");
        }

        if self
            .store
            .persist(&claim, &mut ticket, &contact, &msg, media.as_ref())
            .await?
            .is_none()
        {
            zapdesk_prometheus::record_duplicate();
            return Ok(PipelineOutcome::Duplicate);
        }

        if !msg.from_me {
            if let Err(e) = self.rules.process(msg.text(), &ticket).await {
                warn!(ticket_id = ticket.id, error = %e, "rule engine failed");
            }
        }

        let dispatch = if msg.from_me || msg.is_import {
            None
        } else {
            let input = Inbound {
                channel: &channel,
                contact: &contact,
                message: &msg,
                new_ticket: resolved.created,
            };
            Some(self.router.dispatch(&mut ticket, input).await?)
        };
        drop(claim);

        Ok(PipelineOutcome::Stored {
            ticket_id: ticket.id,
            created: resolved.created,
            dispatch,
        })
    }

    /// Applies one wire event. Errors are logged; the event is not retried.
    pub async fn handle_event(&self, channel_id: ChannelId, event: WireEvent) {
        match event {
            WireEvent::Messages(messages) => {
                for msg in messages {
                    self.handle_message(channel_id, msg).await;
                }
            }
            WireEvent::Acks(updates) => {
                let result = match self.channel(channel_id).await {
                    Ok(channel) => self.acks.apply(channel.tenant_id, &updates).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(changed) => debug!(channel_id, received = updates.len(), changed, "message updates applied"),
                    Err(e) => warn!(channel_id, error = %e, "failed to apply message updates"),
                }
            }
            WireEvent::GroupUpdates(updates) => {
                if let Err(e) = self.apply_group_updates(channel_id, &updates).await {
                    warn!(channel_id, error = %e, "failed to apply group updates");
                }
            }
            WireEvent::ContactUpdates(updates) => {
                if let Err(e) = self.apply_contact_updates(channel_id, &updates).await {
                    warn!(channel_id, error = %e, "failed to apply contact updates");
                }
            }
            WireEvent::Connection(status) => self.apply_connection(channel_id, status).await,
            WireEvent::ChannelError { code, message } => {
                zapdesk_prometheus::record_channel_error(code);
                if !is_fatal_auth_code(code) {
                    warn!(channel_id, code, message, "channel reported an error");
                    return;
                }
                match self.channel(channel_id).await {
                    Ok(channel) => {
                        self.deps
                            .force_disconnect(channel.tenant_id, channel_id, &message)
                            .await
                    }
                    Err(e) => warn!(channel_id, error = %e, "channel error for unknown channel"),
                }
            }
        }
    }

    async fn apply_group_updates(
        &self,
        channel_id: ChannelId,
        updates: &[GroupUpdate],
    ) -> Result<(), ZapdeskError> {
        let channel = self.channel(channel_id).await?;
        let storage = &self.deps.storage;
        for update in updates {
            self.resolver.invalidate_group(&update.group_id);
            let Some(subject) = update.subject.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            if storage
                .find_contact(channel.tenant_id, &update.group_id)
                .await?
                .is_none()
            {
                continue;
            }
            let contact = storage
                .upsert_contact(&NewContact {
                    tenant_id: channel.tenant_id,
                    name: subject.to_string(),
                    number: update.group_id.clone(),
                    is_group: true,
                    channel_id: Some(channel_id),
                    profile_pic_url: None,
                })
                .await?;
            debug!(channel_id, group_id = %update.group_id, "group subject refreshed");
            self.deps.publisher.publish(events::contact_event(&contact)).await;
        }
        Ok(())
    }

    /// Refreshes names and pictures of contacts we already know.
    async fn apply_contact_updates(
        &self,
        channel_id: ChannelId,
        updates: &[ContactUpdate],
    ) -> Result<(), ZapdeskError> {
        let channel = self.channel(channel_id).await?;
        let storage = &self.deps.storage;
        for update in updates {
            let number = normalize_number(&update.number);
            let Some(known) = storage.find_contact(channel.tenant_id, &number).await? else {
                continue;
            };
            if update.name.is_none() && update.picture_url.is_none() {
                continue;
            }
            let contact = storage
                .upsert_contact(&NewContact {
                    tenant_id: channel.tenant_id,
                    name: update.name.clone().unwrap_or_default(),
                    number,
                    is_group: known.is_group,
                    channel_id: known.channel_id,
                    profile_pic_url: update.picture_url.clone(),
                })
                .await?;
            self.deps.publisher.publish(events::contact_event(&contact)).await;
        }
        Ok(())
    }

    async fn apply_connection(&self, channel_id: ChannelId, status: SessionStatus) {
        let Some(session) = self.deps.registry.session(channel_id) else {
            debug!(channel_id, %status, "connection update for unregistered channel");
            return;
        };
        if session.status == status {
            return;
        }
        info!(channel_id, from = %session.status, to = %status, "channel connection changed");
        if let Err(e) = self
            .deps
            .set_channel_status(session.tenant_id, channel_id, status)
            .await
        {
            warn!(channel_id, error = %e, "failed to persist channel status");
        }
    }

    /// Asks the contact to rate the attendance; their next reply is taken as
    /// the rating.
    pub async fn request_rating(&self, ticket_id: TicketId) -> Result<(), ZapdeskError> {
        let storage = &self.deps.storage;
        let mut ticket = storage
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| ZapdeskError::not_found("ticket", ticket_id))?;
        let Some(user_id) = ticket.user_id else {
            return Err(ZapdeskError::Validation(format!(
                "ticket {ticket_id} has no assigned user to rate"
            )));
        };
        if ticket.is_closed() {
            return Err(ZapdeskError::Validation(format!(
                "ticket {ticket_id} is already closed"
            )));
        }
        let contact = storage
            .get_contact(ticket.contact_id)
            .await?
            .ok_or_else(|| ZapdeskError::not_found("contact", ticket.contact_id))?;
        let channel = self.channel(ticket.channel_id).await?;

        let prompt = channel
            .rating_message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_RATING_MESSAGE.to_string());
        self.outbound.send_text(&mut ticket, &contact, &prompt).await?;

        let mut tracking = storage.create_tracking(&ticket).await?;
        tracking.user_id = Some(user_id);
        tracking.rating_at = Some(self.deps.clock.now());
        tracking.finished_at = None;
        storage.update_tracking(&tracking).await?;
        info!(tenant_id = ticket.tenant_id, ticket_id, user_id, "rating requested");
        Ok(())
    }

    /// Consumes channel events until `cancel` fires, then lets every channel
    /// worker finish what it already received.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ChannelEvent>, cancel: CancellationToken) {
        let mut workers: HashMap<ChannelId, (mpsc::Sender<WireEvent>, JoinHandle<()>)> =
            HashMap::new();
        info!("pipeline started");

        loop {
            let (channel_id, event) = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(next) => next,
                    None => break,
                },
            };

            let tx = workers
                .entry(channel_id)
                .or_insert_with(|| self.spawn_worker(channel_id))
                .0
                .clone();
            if let Err(mpsc::error::SendError(event)) = tx.send(event).await {
                warn!(channel_id, "channel worker stopped, restarting");
                let (tx, handle) = self.spawn_worker(channel_id);
                if tx.send(event).await.is_err() {
                    error!(channel_id, "channel worker unavailable, event lost");
                }
                workers.insert(channel_id, (tx, handle));
            }
        }

        let handles = workers.into_values().map(|(_, handle)| handle).collect();
        shutdown::drain_tasks(handles, Duration::from_secs(30)).await;
        info!("pipeline stopped");
    }

    fn spawn_worker(self: &Arc<Self>, channel_id: ChannelId) -> (mpsc::Sender<WireEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(WORKER_QUEUE);
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                pipeline.handle_event(channel_id, event).await;
            }
            debug!(channel_id, "channel worker finished");
        });
        (tx, handle)
    }

    /// Starts scheduler expiry, channel health and lock pruning loops.
    pub fn spawn_background(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![self.scheduler.spawn_sweep(
            Duration::from_secs(self.chatbot.sweep_interval_secs),
            cancel.clone(),
        )];
        tasks.extend(self.health.spawn(cancel.clone()));

        let pipeline = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(LOCK_PRUNE_INTERVAL);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let pruned = pipeline.resolver.prune_locks();
                        if pruned > 0 {
                            debug!(pruned, "idle ticket locks pruned");
                        }
                    }
                }
            }
        }));
        tasks
    }

    async fn channel(&self, channel_id: ChannelId) -> Result<Channel, ZapdeskError> {
        self.deps
            .storage
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| ZapdeskError::not_found("channel", channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::testing::{self, TENANT};
    use zapdesk_core::StorageAdapter;
    use zapdesk_core::types::{
        Ack, MessageId, MessageType, MessageUpdate, SessionStatus, TicketStatus,
    };
    use zapdesk_storage::queries::catalog::{self, NewQueue};

    fn pipeline(fx: &testing::Fixture) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            fx.deps.clone(),
            &ZapdeskConfig::default(),
            Collaborators::default(),
            None,
            Arc::new(InMemoryKv::new()),
        ))
    }

    #[tokio::test]
    async fn hello_from_new_number_gets_the_menu() {
        let fx = testing::fixture().await;
        let db = fx.storage.database().unwrap();
        for (i, name) in ["Vendas", "Suporte"].iter().enumerate() {
            catalog::insert_queue(db, &NewQueue::new(TENANT, fx.channel.id, *name, i as i64))
                .await
                .unwrap();
        }
        let p = pipeline(&fx);

        let outcome = p
            .handle_message(fx.channel.id, testing::text_from("wamid.1", "5511977776666", "Hello"))
            .await;
        let PipelineOutcome::Stored { ticket_id, created, dispatch } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!(created);
        assert_eq!(dispatch, Some(DispatchOutcome::QueueMenu));

        let ticket = fx.storage.get_ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
        let stored = fx
            .storage
            .get_message(TENANT, &MessageId("wamid.1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ack, Ack::Unknown);
        assert!(fx.publisher.rooms_for("ticket").contains(&"tenant-1-pending".to_string()));
        assert!(fx.client.last_text().contains("*1* - Vendas"));
    }

    #[tokio::test]
    async fn rejected_token_on_reply_disconnects_the_channel() {
        let fx = testing::fixture().await;
        let db = fx.storage.database().unwrap();
        for (i, name) in ["Vendas", "Suporte"].iter().enumerate() {
            catalog::insert_queue(db, &NewQueue::new(TENANT, fx.channel.id, *name, i as i64))
                .await
                .unwrap();
        }
        fx.deps
            .set_channel_status(TENANT, fx.channel.id, SessionStatus::Connected)
            .await
            .unwrap();
        *fx.client.send_error.lock() = Some(190);
        let p = pipeline(&fx);

        let outcome = p
            .handle_message(fx.channel.id, testing::text_from("wamid.190", "5511977776666", "Hello"))
            .await;
        assert_eq!(outcome, PipelineOutcome::Failed);
        assert!(!fx.deps.registry.exists(fx.channel.id));
        let channel = fx.storage.get_channel(fx.channel.id).await.unwrap().unwrap();
        assert_eq!(channel.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn replays_are_skipped() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        let msg = testing::text_from("wamid.2", "5511977776666", "oi");

        assert!(matches!(
            p.handle_message(fx.channel.id, msg.clone()).await,
            PipelineOutcome::Stored { .. }
        ));
        assert_eq!(p.handle_message(fx.channel.id, msg).await, PipelineOutcome::Duplicate);
    }

    #[tokio::test]
    async fn unsupported_messages_touch_nothing() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        let mut msg = testing::text_from("wamid.3", "5511977776666", "oi");
        msg.message_type = MessageType::Unsupported;

        assert_eq!(p.handle_message(fx.channel.id, msg).await, PipelineOutcome::Dropped);
        assert!(fx.storage.find_contact(TENANT, "5511977776666").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn own_messages_are_not_dispatched() {
        let fx = testing::fixture_with(|c| c.greeting_message = Some("Olá!".into())).await;
        let p = pipeline(&fx);
        let mut msg = testing::text_from("wamid.4", "5511977776666", "bom dia");
        msg.from_me = true;

        let outcome = p.handle_message(fx.channel.id, msg).await;
        assert!(matches!(outcome, PipelineOutcome::Stored { dispatch: None, .. }));
        assert!(fx.client.texts().is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_fails_soft() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        let outcome = p
            .handle_message(9999, testing::text_from("wamid.5", "5511977776666", "oi"))
            .await;
        assert_eq!(outcome, PipelineOutcome::Failed);
    }

    #[tokio::test]
    async fn rating_round_trip() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        let (contact, mut ticket) = testing::ticket_for(&fx, "5511955554444", "Ana").await;

        assert!(matches!(
            p.request_rating(ticket.id).await,
            Err(ZapdeskError::Validation(_))
        ));

        ticket.user_id = Some(3);
        ticket.status = TicketStatus::Open;
        fx.storage.update_ticket(&ticket).await.unwrap();
        p.request_rating(ticket.id).await.unwrap();
        assert_eq!(fx.client.last_text(), DEFAULT_RATING_MESSAGE);

        let outcome = p
            .handle_message(fx.channel.id, testing::text_from("wamid.r", &contact.number, "4"))
            .await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Stored { dispatch: Some(DispatchOutcome::Rated), .. }
        ));
        let tracking = fx.storage.find_tracking(ticket.id).await.unwrap().unwrap();
        assert_eq!(tracking.rating, Some(4));
        let closed = fx.storage.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
    }

    #[tokio::test]
    async fn revocation_marks_the_message_deleted() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        p.handle_message(fx.channel.id, testing::text_from("wamid.6", "5511977776666", "ops"))
            .await;

        p.handle_event(
            fx.channel.id,
            WireEvent::Acks(vec![MessageUpdate::Revoked {
                external_id: MessageId("wamid.6".into()),
            }]),
        )
        .await;
        let stored = fx
            .storage
            .get_message(TENANT, &MessageId("wamid.6".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_deleted);
    }

    #[tokio::test]
    async fn contact_updates_only_touch_known_contacts() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        testing::ticket_for(&fx, "5511911112222", "Antigo").await;

        p.handle_event(
            fx.channel.id,
            WireEvent::ContactUpdates(vec![
                ContactUpdate {
                    number: "5511911112222".into(),
                    name: Some("Novo".into()),
                    picture_url: Some("https://pics.example/1.jpg".into()),
                },
                ContactUpdate {
                    number: "5511933334444".into(),
                    name: Some("Estranho".into()),
                    picture_url: None,
                },
            ]),
        )
        .await;

        let known = fx.storage.find_contact(TENANT, "5511911112222").await.unwrap().unwrap();
        assert_eq!(known.name, "Novo");
        assert_eq!(known.profile_pic_url.as_deref(), Some("https://pics.example/1.jpg"));
        assert!(fx.storage.find_contact(TENANT, "5511933334444").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fatal_channel_error_disconnects() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);

        p.handle_event(
            fx.channel.id,
            WireEvent::ChannelError {
                code: 100,
                message: "bad parameter".into(),
            },
        )
        .await;
        assert!(fx.deps.registry.exists(fx.channel.id));

        p.handle_event(
            fx.channel.id,
            WireEvent::ChannelError {
                code: 190,
                message: "token expired".into(),
            },
        )
        .await;
        assert!(!fx.deps.registry.exists(fx.channel.id));
        let stored = fx.storage.get_channel(fx.channel.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn connection_changes_emit_once() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        p.handle_event(fx.channel.id, WireEvent::Connection(SessionStatus::Connected)).await;
        assert!(fx.publisher.rooms_for("whatsappSession").is_empty());
        p.handle_event(fx.channel.id, WireEvent::Connection(SessionStatus::Limited)).await;
        assert_eq!(fx.publisher.rooms_for("whatsappSession").len(), 1);
    }

    #[tokio::test]
    async fn run_drains_queued_events_on_cancel() {
        let fx = testing::fixture().await;
        let p = pipeline(&fx);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&p).run(rx, cancel.clone()));

        for i in 0..5 {
            let msg = testing::text_from(&format!("wamid.q{i}"), "5511977776666", "oi");
            tx.send((fx.channel.id, WireEvent::Messages(vec![msg]))).await.unwrap();
        }
        drop(tx);
        runner.await.unwrap();

        for i in 0..5 {
            let id = MessageId(format!("wamid.q{i}"));
            assert!(fx.storage.message_exists(TENANT, &id).await.unwrap());
        }
    }
}
