// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decides who answers an inbound message.
//!
//! Rules are tried in a fixed order and the first one that takes the message
//! wins:
//!
//! 1. rating capture
//! 2. reset keyword
//! 3. exit keyword
//! 4. flow builder execution
//! 5. assistant
//! 6. prompt bot (falls through unless it closed the ticket)
//! 7. ticket integration
//! 8. queue selection menu
//! 9. appointment scheduler
//! 10. out-of-hours notice, greeting, queue options menu
//!
//! Collaborator failures are logged and count as "not handled".

use std::sync::Arc;

use strum::Display;
use tracing::{debug, info, warn};

use zapdesk_config::model::ChatbotConfig;
use zapdesk_core::models::{Channel, Contact, Ticket};
use zapdesk_core::types::{InboundMessage, TicketStatus};
use zapdesk_core::{DispatchRequest, ZapdeskError};

use crate::chatbot::{MenuOutcome, QueueMenu};
use crate::collaborators::Collaborators;
use crate::deps::PipelineDeps;
use crate::events::{self, Action};
use crate::hours;
use crate::notices::{NoticeCache, NoticeKind};
use crate::outbound::Outbound;
use crate::scheduler::AppointmentScheduler;

const DEFAULT_FAREWELL: &str = "Obrigado pela avaliação!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchOutcome {
    Rated,
    Reset,
    Exited,
    Flow,
    Assistant,
    /// The prompt bot closed the ticket.
    Prompt,
    Integration,
    QueueMenu,
    Scheduler,
    OutOfHours,
    Greeting,
    QueueOptions,
    Unhandled,
}

/// Rating from a reply: below 1 is 0, above 5 is 5, non-numeric is 5.
pub fn parse_rating(body: &str) -> i64 {
    match body.trim().parse::<i64>() {
        Ok(n) if n < 1 => 0,
        Ok(n) if n > 5 => 5,
        Ok(n) => n,
        Err(_) => 5,
    }
}

/// Everything the router reads about the message being dispatched.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub channel: &'a Channel,
    pub contact: &'a Contact,
    pub message: &'a InboundMessage,
    /// The ticket was created by this message.
    pub new_ticket: bool,
}

impl Inbound<'_> {
    fn request(&self, ticket: &Ticket) -> DispatchRequest {
        DispatchRequest {
            channel: self.channel.clone(),
            contact: self.contact.clone(),
            ticket: ticket.clone(),
            message: self.message.clone(),
        }
    }

    fn body(&self) -> &str {
        self.message.text().trim()
    }
}

pub struct Router {
    deps: PipelineDeps,
    collaborators: Collaborators,
    outbound: Arc<Outbound>,
    menu: QueueMenu,
    scheduler: Arc<AppointmentScheduler>,
    notices: Arc<NoticeCache>,
    config: ChatbotConfig,
}

impl Router {
    pub fn new(
        deps: PipelineDeps,
        collaborators: Collaborators,
        outbound: Arc<Outbound>,
        menu: QueueMenu,
        scheduler: Arc<AppointmentScheduler>,
        notices: Arc<NoticeCache>,
        config: ChatbotConfig,
    ) -> Self {
        Self {
            deps,
            collaborators,
            outbound,
            menu,
            scheduler,
            notices,
            config,
        }
    }

    pub async fn dispatch(
        &self,
        ticket: &mut Ticket,
        input: Inbound<'_>,
    ) -> Result<DispatchOutcome, ZapdeskError> {
        let outcome = self.evaluate(ticket, input).await?;
        debug!(ticket_id = ticket.id, %outcome, "message dispatched");
        Ok(outcome)
    }

    async fn evaluate(
        &self,
        ticket: &mut Ticket,
        input: Inbound<'_>,
    ) -> Result<DispatchOutcome, ZapdeskError> {
        let body = input.body();
        let (channel, contact) = (input.channel, input.contact);
        let unassigned = ticket.user_id.is_none();

        if self.capture_rating(ticket, input).await? {
            return Ok(DispatchOutcome::Rated);
        }

        if body == self.config.reset_keyword
            && (unassigned || ticket.status == TicketStatus::Pending)
        {
            self.scheduler.reset(ticket).await?;
            self.menu.leave_queue(ticket).await?;
            self.menu.route(ticket, contact, channel, "").await?;
            return Ok(DispatchOutcome::Reset);
        }

        if !ticket.is_group && body.eq_ignore_ascii_case(&self.config.exit_keyword) {
            self.exit(ticket, input).await?;
            return Ok(DispatchOutcome::Exited);
        }

        if self.run_flow(ticket, input).await? {
            return Ok(DispatchOutcome::Flow);
        }

        if channel.assistant_enabled
            && unassigned
            && !matches!(ticket.status, TicketStatus::Open | TicketStatus::Closed)
        {
            match self.collaborators.assistant.handle(&input.request(ticket)).await {
                Ok(true) => return Ok(DispatchOutcome::Assistant),
                Ok(false) => {}
                Err(e) => warn!(ticket_id = ticket.id, error = %e, "assistant failed"),
            }
        }

        if ticket.queue_id.is_none()
            && !ticket.is_group
            && unassigned
            && (ticket.prompt_id.is_some() || channel.prompt_id.is_some())
        {
            match self.collaborators.prompts.handle(&input.request(ticket)).await {
                Ok(outcome) if outcome.closed => {
                    self.close(ticket).await?;
                    return Ok(DispatchOutcome::Prompt);
                }
                Ok(_) => {}
                Err(e) => warn!(ticket_id = ticket.id, error = %e, "prompt handler failed"),
            }
        }

        if unassigned && ticket.use_integration {
            if let Some(integration_id) = ticket.integration_id {
                if let Err(e) = self
                    .collaborators
                    .integrations
                    .handle(integration_id, &input.request(ticket))
                    .await
                {
                    warn!(ticket_id = ticket.id, integration_id, error = %e, "integration failed");
                }
                return Ok(DispatchOutcome::Integration);
            }
        }

        if ticket.queue_id.is_none() && unassigned && !ticket.is_group {
            match self.menu.route(ticket, contact, channel, body).await? {
                MenuOutcome::Selected(queue) if queue.appointment_enabled => {
                    self.scheduler.start(ticket, contact).await?;
                    return Ok(DispatchOutcome::Scheduler);
                }
                outcome if outcome.produced_output() => return Ok(DispatchOutcome::QueueMenu),
                _ => {}
            }
        }

        if ticket.appointment_mode {
            self.scheduler.handle(ticket, contact, body).await?;
            return Ok(DispatchOutcome::Scheduler);
        }

        self.fallbacks(ticket, input).await
    }

    /// Rating mode: an operator asked for a rating and the ticket is not
    /// finished yet.
    async fn capture_rating(
        &self,
        ticket: &mut Ticket,
        input: Inbound<'_>,
    ) -> Result<bool, ZapdeskError> {
        let storage = &self.deps.storage;
        let Some(mut tracking) = storage.find_tracking(ticket.id).await? else {
            return Ok(false);
        };
        if tracking.user_id.is_none() || tracking.finished_at.is_some() || tracking.rating_at.is_none()
        {
            return Ok(false);
        }

        let rating = parse_rating(input.body());
        tracking.rating = Some(rating);
        tracking.rated = true;
        tracking.finished_at = Some(self.deps.clock.now());
        storage.update_tracking(&tracking).await?;
        info!(ticket_id = ticket.id, rating, "rating captured");

        let farewell = input
            .channel
            .farewell_message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_FAREWELL.to_string());
        if let Err(e) = self.outbound.send_text(ticket, input.contact, &farewell).await {
            warn!(ticket_id = ticket.id, error = %e, "rating farewell not sent");
        }
        self.close(ticket).await?;
        Ok(true)
    }

    async fn exit(&self, ticket: &mut Ticket, input: Inbound<'_>) -> Result<(), ZapdeskError> {
        self.outbound
            .send_text(ticket, input.contact, &self.config.exit_message)
            .await?;
        match self
            .collaborators
            .flows
            .finish_for_contact(ticket.tenant_id, input.contact.id)
            .await
        {
            Ok(n) if n > 0 => debug!(ticket_id = ticket.id, finished = n, "flow executions finished"),
            Ok(_) => {}
            Err(e) => warn!(ticket_id = ticket.id, error = %e, "failed to finish flow executions"),
        }
        self.scheduler.reset(ticket).await?;
        self.close(ticket).await?;
        info!(ticket_id = ticket.id, "contact left the conversation");
        Ok(())
    }

    /// Continues a running flow, or starts the channel's flow on a new ticket.
    async fn run_flow(&self, ticket: &mut Ticket, input: Inbound<'_>) -> Result<bool, ZapdeskError> {
        let flows = &self.collaborators.flows;
        if let Some(execution) = ticket.flow_execution_id.clone() {
            match flows.process_step(&execution, &input.request(ticket)).await {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    debug!(ticket_id = ticket.id, execution, "flow execution ended");
                    ticket.flow_execution_id = None;
                    self.deps.storage.update_ticket(ticket).await?;
                }
                Err(e) => warn!(ticket_id = ticket.id, execution, error = %e, "flow step failed"),
            }
            return Ok(false);
        }

        let Some(flow_id) = input.channel.flow_id.filter(|_| input.new_ticket) else {
            return Ok(false);
        };
        match flows.start(flow_id, &input.request(ticket)).await {
            Ok(Some(execution)) => {
                info!(ticket_id = ticket.id, flow_id, execution, "flow started");
                ticket.flow_execution_id = Some(execution);
                self.deps.storage.update_ticket(ticket).await?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(ticket_id = ticket.id, flow_id, error = %e, "flow start failed");
                Ok(false)
            }
        }
    }

    async fn fallbacks(
        &self,
        ticket: &mut Ticket,
        input: Inbound<'_>,
    ) -> Result<DispatchOutcome, ZapdeskError> {
        let (channel, contact) = (input.channel, input.contact);
        let unassigned = ticket.user_id.is_none();

        if hours::is_out_of_hours(channel.schedule.as_deref(), self.deps.clock.now()) {
            let Some(notice) = channel.out_of_hours_message.as_deref().filter(|m| !m.is_empty())
            else {
                return Ok(DispatchOutcome::Unhandled);
            };
            if !self.notices.should_send(NoticeKind::OutOfHours, contact.id) {
                return Ok(DispatchOutcome::Unhandled);
            }
            self.outbound.send_text(ticket, contact, notice).await?;
            return Ok(DispatchOutcome::OutOfHours);
        }

        if ticket.queue_id.is_none() && unassigned && !ticket.is_group {
            if let Some(greeting) = channel.greeting_message.as_deref().filter(|m| !m.is_empty()) {
                if self.notices.should_send(NoticeKind::Greeting, ticket.id) {
                    let text = greeting.replace("{{name}}", &contact.name);
                    self.outbound.send_text(ticket, contact, &text).await?;
                    return Ok(DispatchOutcome::Greeting);
                }
            }
        }

        if ticket.queue_id.is_some() && ticket.chatbot && unassigned {
            let outcome = self
                .menu
                .options(ticket, contact, channel, input.body())
                .await?;
            if outcome.produced_output() {
                return Ok(DispatchOutcome::QueueOptions);
            }
        }

        Ok(DispatchOutcome::Unhandled)
    }

    /// Closes the ticket and drops every automation marker.
    async fn close(&self, ticket: &mut Ticket) -> Result<(), ZapdeskError> {
        let previous = ticket.status;
        ticket.status = TicketStatus::Closed;
        ticket.clear_automation();
        self.deps.storage.update_ticket(ticket).await?;
        let mut out = events::ticket_events(ticket, Action::Update);
        if previous != TicketStatus::Closed {
            // operators watching the old status list must drop the ticket
            let mut stale = ticket.clone();
            stale.status = previous;
            out.extend(events::ticket_events(&stale, Action::Delete));
        }
        events::publish_all(self.deps.publisher.as_ref(), out).await;
        Ok(())
    }
}
