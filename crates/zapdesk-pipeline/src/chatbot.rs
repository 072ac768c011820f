// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Menu-driven queue routing and the per-queue options sub-menu.

use std::sync::Arc;

use tracing::{debug, info};

use zapdesk_core::ZapdeskError;
use zapdesk_core::models::{Channel, Contact, Queue, Ticket};

use crate::deps::PipelineDeps;
use crate::events::{self, Action};
use crate::notices::{NoticeCache, NoticeKind};
use crate::outbound::Outbound;

const BACK: &str = "0";

/// What the menu did with a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuOutcome {
    /// Nothing to do for this ticket.
    Ignored,
    /// The menu was (re)sent.
    Presented,
    Selected(Queue),
    /// An option of the ticket's queue was answered.
    OptionChosen,
    /// The contact went back to the queue list.
    Back,
    /// Suppressed re-display; nothing was sent.
    Silent,
}

impl MenuOutcome {
    pub fn produced_output(&self) -> bool {
        !matches!(self, Self::Ignored | Self::Silent)
    }
}

pub struct QueueMenu {
    deps: PipelineDeps,
    outbound: Arc<Outbound>,
    notices: Arc<NoticeCache>,
}

impl QueueMenu {
    pub fn new(deps: PipelineDeps, outbound: Arc<Outbound>, notices: Arc<NoticeCache>) -> Self {
        Self {
            deps,
            outbound,
            notices,
        }
    }

    /// Routes an unqueued ticket: a valid number picks a queue, anything else
    /// shows the list. A channel with one queue assigns it directly.
    pub async fn route(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        channel: &Channel,
        body: &str,
    ) -> Result<MenuOutcome, ZapdeskError> {
        let queues = self.deps.storage.list_queues(channel.id).await?;
        match queues.len() {
            0 => return Ok(MenuOutcome::Ignored),
            1 => {
                let queue = queues.into_iter().next().ok_or_else(|| {
                    ZapdeskError::Internal("queue list changed while routing".into())
                })?;
                self.select_queue(ticket, contact, &queue).await?;
                return Ok(MenuOutcome::Selected(queue));
            }
            _ => {}
        }

        if let Some(queue) = pick(&queues, body) {
            let queue = queue.clone();
            self.select_queue(ticket, contact, &queue).await?;
            return Ok(MenuOutcome::Selected(queue));
        }

        let text = queue_list_text(channel.greeting_message.as_deref(), contact, &queues);
        self.outbound.send_text(ticket, contact, &text).await?;
        self.notices.should_send(NoticeKind::QueueMenu, ticket.id);
        Ok(MenuOutcome::Presented)
    }

    /// Handles replies while the ticket sits in a queue's options sub-menu.
    pub async fn options(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        channel: &Channel,
        body: &str,
    ) -> Result<MenuOutcome, ZapdeskError> {
        let Some(queue_id) = ticket.queue_id else {
            return Ok(MenuOutcome::Ignored);
        };
        if !ticket.chatbot {
            return Ok(MenuOutcome::Ignored);
        }
        let queues = self.deps.storage.list_queues(channel.id).await?;
        let Some(queue) = queues.iter().find(|q| q.id == queue_id) else {
            return Ok(MenuOutcome::Ignored);
        };

        if body.trim() == BACK {
            self.leave_queue(ticket).await?;
            let text = queue_list_text(channel.greeting_message.as_deref(), contact, &queues);
            self.outbound.send_text(ticket, contact, &text).await?;
            self.notices.forget(NoticeKind::QueueMenu, ticket.id);
            return Ok(MenuOutcome::Back);
        }

        if let Some(option) = choice(body, queue.options.len()).map(|i| &queue.options[i]) {
            let reply = option.message.clone().unwrap_or_else(|| option.title.clone());
            ticket.chatbot = false;
            self.deps.storage.update_ticket(ticket).await?;
            self.outbound.send_text(ticket, contact, &reply).await?;
            events::publish_all(
                self.deps.publisher.as_ref(),
                events::ticket_events(ticket, Action::Update),
            )
            .await;
            debug!(ticket_id = ticket.id, option = %option.title, "queue option chosen");
            return Ok(MenuOutcome::OptionChosen);
        }

        if !self.notices.should_send(NoticeKind::QueueMenu, ticket.id) {
            return Ok(MenuOutcome::Silent);
        }
        self.outbound
            .send_text(ticket, contact, &options_text(queue))
            .await?;
        Ok(MenuOutcome::Presented)
    }

    /// Puts the ticket in `queue`, stamps tracking and greets the contact.
    pub async fn select_queue(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        queue: &Queue,
    ) -> Result<(), ZapdeskError> {
        let now = self.deps.clock.now();
        ticket.queue_id = Some(queue.id);
        ticket.chatbot = !queue.options.is_empty();
        if let Some(integration_id) = queue.integration_id {
            ticket.integration_id = Some(integration_id);
            ticket.use_integration = true;
        }
        ticket.appointment_mode = queue.appointment_enabled;
        self.deps.storage.update_ticket(ticket).await?;

        let storage = &self.deps.storage;
        let mut tracking = match storage.find_tracking(ticket.id).await? {
            Some(t) => t,
            None => storage.create_tracking(ticket).await?,
        };
        tracking.queued_at = Some(now);
        if ticket.chatbot {
            tracking.chatbot_at = Some(now);
        }
        storage.update_tracking(&tracking).await?;
        info!(ticket_id = ticket.id, queue_id = queue.id, queue = %queue.name, "ticket queued");

        events::publish_all(
            self.deps.publisher.as_ref(),
            events::ticket_events(ticket, Action::Update),
        )
        .await;

        if let Some(greeting) = queue.greeting_message.as_deref().filter(|g| !g.is_empty()) {
            self.outbound.send_text(ticket, contact, greeting).await?;
        }
        if ticket.chatbot {
            self.outbound
                .send_text(ticket, contact, &options_text(queue))
                .await?;
            self.notices.should_send(NoticeKind::QueueMenu, ticket.id);
        }
        Ok(())
    }

    /// Clears queue and chatbot state so the next reply starts over.
    pub async fn leave_queue(&self, ticket: &mut Ticket) -> Result<(), ZapdeskError> {
        ticket.queue_id = None;
        ticket.chatbot = false;
        ticket.appointment_mode = false;
        self.deps.storage.update_ticket(ticket).await
    }
}

/// Zero-based index for a one-based numeric reply.
fn choice(body: &str, len: usize) -> Option<usize> {
    let n: usize = body.trim().parse().ok()?;
    (1..=len).contains(&n).then(|| n - 1)
}

fn pick<'a>(queues: &'a [Queue], body: &str) -> Option<&'a Queue> {
    choice(body, queues.len()).map(|i| &queues[i])
}

fn queue_list_text(greeting: Option<&str>, contact: &Contact, queues: &[Queue]) -> String {
    let mut text = match greeting.filter(|g| !g.is_empty()) {
        Some(g) => g.replace("{{name}}", &contact.name),
        None => format!("Olá, {}! Escolha uma opção:", contact.name),
    };
    text.push('\n');
    for (i, q) in queues.iter().enumerate() {
        text.push_str(&format!("\n*{}* - {}", i + 1, q.name));
    }
    text
}

fn options_text(queue: &Queue) -> String {
    let mut text = format!("*{}*\nEscolha uma opção:\n", queue.name);
    for (i, o) in queue.options.iter().enumerate() {
        text.push_str(&format!("\n*{}* - {}", i + 1, o.title));
    }
    text.push_str(&format!("\n*{BACK}* - Voltar"));
    text
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kv::InMemoryKv;
    use crate::persistence::MessageStore;
    use crate::resolver::{Resolver, TicketRequest};
    use crate::testing::{self, TENANT};
    use zapdesk_config::model::TicketConfig;
    use zapdesk_core::StorageAdapter;
    use zapdesk_storage::queries::catalog::{self, NewQueue};

    struct Setup {
        fx: testing::Fixture,
        menu: QueueMenu,
        ticket: Ticket,
        contact: Contact,
    }

    async fn setup(queues: &[(&str, &[&str])]) -> Setup {
        let fx = testing::fixture().await;
        let db = fx.storage.database().unwrap();
        for (i, (name, options)) in queues.iter().enumerate() {
            let id = catalog::insert_queue(db, &NewQueue::new(TENANT, fx.channel.id, *name, i as i64))
                .await
                .unwrap();
            for (j, title) in options.iter().enumerate() {
                let reply = format!("Você escolheu {title}");
                catalog::insert_queue_option(db, id, title, Some(reply.as_str()), j as i64)
                    .await
                    .unwrap();
            }
        }
        let msg = testing::text_from("wamid.1", "5511988887777", "oi");
        let resolver = Resolver::new(
            fx.deps.clone(),
            Arc::new(InMemoryKv::new()),
            TicketConfig::default(),
        );
        let contact = resolver.resolve_contact(&fx.channel, &msg).await.unwrap();
        let ticket = resolver
            .resolve_ticket(&contact, &fx.channel, TicketRequest::from(&msg))
            .await
            .unwrap()
            .ticket;
        let store = Arc::new(MessageStore::new(fx.deps.clone(), None, Duration::from_secs(1)));
        let outbound = Arc::new(Outbound::new(fx.deps.clone(), store));
        let notices = Arc::new(NoticeCache::new(fx.clock.clone(), 1800, 100));
        let menu = QueueMenu::new(fx.deps.clone(), outbound, notices);
        Setup {
            fx,
            menu,
            ticket,
            contact,
        }
    }

    #[tokio::test]
    async fn invalid_reply_lists_queues_and_number_selects() {
        let mut s = setup(&[("Financeiro", &[]), ("Suporte", &[])]).await;
        let channel = s.fx.channel.clone();

        let out = s.menu.route(&mut s.ticket, &s.contact, &channel, "oi").await.unwrap();
        assert_eq!(out, MenuOutcome::Presented);
        let menu = s.fx.client.last_text();
        assert!(menu.contains("*1* - Financeiro"));
        assert!(menu.contains("*2* - Suporte"));

        let out = s.menu.route(&mut s.ticket, &s.contact, &channel, " 2 ").await.unwrap();
        assert!(matches!(out, MenuOutcome::Selected(ref q) if q.name == "Suporte"));
        let stored = s.fx.storage.get_ticket(s.ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.queue_id, s.ticket.queue_id);
        assert!(!stored.chatbot);
        let tracking = s.fx.storage.find_tracking(s.ticket.id).await.unwrap().unwrap();
        assert!(tracking.queued_at.is_some());
        assert!(tracking.chatbot_at.is_none());
    }

    #[tokio::test]
    async fn no_queues_means_no_output() {
        let mut s = setup(&[]).await;
        let channel = s.fx.channel.clone();
        let out = s.menu.route(&mut s.ticket, &s.contact, &channel, "oi").await.unwrap();
        assert!(!out.produced_output());
        assert!(s.fx.client.texts().is_empty());
    }

    #[tokio::test]
    async fn options_sub_menu_with_back() {
        let mut s = setup(&[("Financeiro", &["Boleto", "Nota fiscal"]), ("Suporte", &[])]).await;
        let channel = s.fx.channel.clone();

        s.menu.route(&mut s.ticket, &s.contact, &channel, "1").await.unwrap();
        assert!(s.ticket.chatbot);
        assert!(s.fx.client.last_text().contains("*0* - Voltar"));

        // re-display is suppressed within the window
        let out = s.menu.options(&mut s.ticket, &s.contact, &channel, "xyz").await.unwrap();
        assert_eq!(out, MenuOutcome::Silent);

        let out = s.menu.options(&mut s.ticket, &s.contact, &channel, "0").await.unwrap();
        assert_eq!(out, MenuOutcome::Back);
        assert!(s.ticket.queue_id.is_none());
        assert!(s.fx.client.last_text().contains("*2* - Suporte"));

        s.menu.route(&mut s.ticket, &s.contact, &channel, "1").await.unwrap();
        let out = s.menu.options(&mut s.ticket, &s.contact, &channel, "2").await.unwrap();
        assert_eq!(out, MenuOutcome::OptionChosen);
        assert_eq!(s.fx.client.last_text(), "Você escolheu Nota fiscal");
        assert!(!s.ticket.chatbot);
    }

    #[tokio::test]
    async fn single_queue_is_assigned_directly() {
        let mut s = setup(&[("Atendimento", &[])]).await;
        let channel = s.fx.channel.clone();
        let out = s.menu.route(&mut s.ticket, &s.contact, &channel, "oi").await.unwrap();
        assert!(matches!(out, MenuOutcome::Selected(_)));
        assert!(s.ticket.queue_id.is_some());
    }

    #[test]
    fn choices_are_one_based() {
        assert_eq!(choice("1", 2), Some(0));
        assert_eq!(choice("0", 2), None);
        assert_eq!(choice("3", 2), None);
        assert_eq!(choice("dois", 2), None);
    }
}
