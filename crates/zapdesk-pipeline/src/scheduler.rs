// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in appointment booking conversation.
//!
//! ```text
//! WELCOME -> MENU -> SERVICE_SELECTION -> PROFESSIONAL_SELECTION
//!                 -> DATE_SELECTION -> TIME_SELECTION -> CONFIRMATION -> DONE
//!         -> VIEW_APPOINTMENTS -> CANCEL_APPOINTMENT -> MENU
//! ```
//!
//! Every listing stores the options it showed; replies are one-based indices
//! into that stored list. `0` steps back, `AGENDA` restarts from anywhere.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zapdesk_config::model::ChatbotConfig;
use zapdesk_core::models::{
    ChatbotStateRecord, Contact, NewAppointment, Professional, Ticket, format_minutes,
    minutes_of, overlaps,
};
use zapdesk_core::{FlowEngine, ZapdeskError};

use crate::deps::PipelineDeps;
use crate::events::{self, Action};
use crate::locks::KeyedLocks;
use crate::outbound::Outbound;
use crate::state_cache::ChatbotStateCache;

const BACK: &str = "0";
const CONFIRM: &str = "CONFIRMAR";
const CANCEL: &str = "CANCELAR";

const MENU_TEXT: &str = "*1* - Agendar horário\n*2* - Meus agendamentos\n*3* - Sair";
const WEEKDAYS: [&str; 7] = ["seg", "ter", "qua", "qui", "sex", "sáb", "dom"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Welcome,
    Menu,
    ServiceSelection,
    ProfessionalSelection,
    DateSelection,
    TimeSelection,
    Confirmation,
    ViewAppointments,
    CancelAppointment,
    Done,
}

/// One entry of a presented list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub label: String,
    /// Service duration, zero for other lists.
    #[serde(default)]
    pub minutes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Context {
    #[serde(default)]
    options: Vec<Choice>,
    service: Option<Choice>,
    professional: Option<Choice>,
    date: Option<String>,
    time: Option<String>,
    appointment: Option<Choice>,
}

impl Context {
    fn pick(&self, input: &str) -> Option<Choice> {
        let n: usize = input.parse().ok()?;
        n.checked_sub(1).and_then(|i| self.options.get(i)).cloned()
    }
}

fn is_restart(input: &str) -> bool {
    let upper = input.to_uppercase();
    upper == "AGENDA" || upper == "#AGENDA"
}

fn numbered(title: &str, options: &[Choice], describe: impl Fn(&Choice) -> String) -> String {
    let mut text = title.to_string();
    text.push('\n');
    for (i, c) in options.iter().enumerate() {
        text.push_str(&format!("\n*{}* - {}", i + 1, describe(c)));
    }
    text.push_str(&format!("\n\n*{BACK}* - Voltar"));
    text
}

fn display_date(iso: &str) -> String {
    match NaiveDate::parse_from_str(iso, "%Y-%m-%d") {
        Ok(d) => format!(
            "{} ({})",
            d.format("%d/%m"),
            WEEKDAYS[d.weekday().num_days_from_monday() as usize]
        ),
        Err(_) => iso.to_string(),
    }
}

pub struct AppointmentScheduler {
    deps: PipelineDeps,
    outbound: Arc<Outbound>,
    states: Arc<ChatbotStateCache>,
    flows: Arc<dyn FlowEngine>,
    config: ChatbotConfig,
    offset: FixedOffset,
    slot_locks: KeyedLocks<(i64, String)>,
}

impl AppointmentScheduler {
    pub fn new(
        deps: PipelineDeps,
        outbound: Arc<Outbound>,
        states: Arc<ChatbotStateCache>,
        flows: Arc<dyn FlowEngine>,
        config: ChatbotConfig,
    ) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Self {
            deps,
            outbound,
            states,
            flows,
            config,
            offset,
            slot_locks: KeyedLocks::new(),
        }
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        self.deps.clock.now().with_timezone(&self.offset)
    }

    /// Greets the contact and shows the main menu.
    pub async fn start(&self, ticket: &mut Ticket, contact: &Contact) -> Result<(), ZapdeskError> {
        let text = format!(
            "Olá, {}! Bem-vindo(a) ao agendamento online.\n\n{MENU_TEXT}",
            contact.name
        );
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::Menu, Context::default()).await
    }

    /// Forgets the conversation without messaging the contact.
    pub async fn reset(&self, ticket: &Ticket) -> Result<(), ZapdeskError> {
        self.states.remove(ticket.tenant_id, ticket.id).await
    }

    /// Advances the conversation with one reply. Always consumes the message.
    pub async fn handle(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        body: &str,
    ) -> Result<bool, ZapdeskError> {
        let input = body.trim();
        if is_restart(input) {
            self.start(ticket, contact).await?;
            return Ok(true);
        }
        let Some(record) = self.states.get(ticket.tenant_id, ticket.id).await? else {
            self.start(ticket, contact).await?;
            return Ok(true);
        };
        let step = Step::from_str(&record.step).unwrap_or(Step::Welcome);
        let ctx: Context = serde_json::from_str(&record.context).unwrap_or_default();
        debug!(ticket_id = ticket.id, %step, input, "scheduler reply");

        match step {
            Step::Welcome | Step::Done => self.start(ticket, contact).await?,
            Step::Menu => self.on_menu(ticket, contact, input).await?,
            Step::ServiceSelection => self.on_service(ticket, contact, input, ctx).await?,
            Step::ProfessionalSelection => {
                self.on_professional(ticket, contact, input, ctx).await?
            }
            Step::DateSelection => self.on_date(ticket, contact, input, ctx).await?,
            Step::TimeSelection => self.on_time(ticket, contact, input, ctx).await?,
            Step::Confirmation => self.on_confirmation(ticket, contact, input, ctx).await?,
            Step::ViewAppointments => self.on_view(ticket, contact, input, ctx).await?,
            Step::CancelAppointment => self.on_cancel(ticket, contact, input, ctx).await?,
        }
        Ok(true)
    }

    async fn on_menu(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
    ) -> Result<(), ZapdeskError> {
        match input {
            "1" => self.show_services(ticket, contact, Context::default()).await,
            "2" => self.show_appointments(ticket, contact).await,
            "3" => {
                let farewell = self.config.exit_message.clone();
                self.finish(ticket, contact, &farewell).await
            }
            _ => self.show_menu(ticket, contact, Some("Opção inválida.")).await,
        }
    }

    async fn show_menu(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        prefix: Option<&str>,
    ) -> Result<(), ZapdeskError> {
        let text = match prefix {
            Some(p) => format!("{p}\n\n{MENU_TEXT}"),
            None => MENU_TEXT.to_string(),
        };
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::Menu, Context::default()).await
    }

    async fn show_services(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let services = self.deps.storage.list_services(ticket.tenant_id).await?;
        if services.is_empty() {
            return self
                .show_menu(ticket, contact, Some("Nenhum serviço disponível no momento."))
                .await;
        }
        ctx.options = services
            .into_iter()
            .map(|s| Choice {
                id: s.id,
                label: s.name,
                minutes: s.duration_minutes,
            })
            .collect();
        let text = numbered("Escolha o serviço:", &ctx.options, |c| {
            format!("{} ({} min)", c.label, c.minutes)
        });
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::ServiceSelection, ctx).await
    }

    async fn on_service(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        if input == BACK {
            return self.show_menu(ticket, contact, None).await;
        }
        match ctx.pick(input) {
            Some(service) => {
                ctx.service = Some(service);
                self.show_professionals(ticket, contact, ctx).await
            }
            None => self.reprompt(ticket, contact, Step::ServiceSelection, ctx).await,
        }
    }

    async fn show_professionals(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let Some(service) = ctx.service.clone() else {
            return self.show_services(ticket, contact, ctx).await;
        };
        let professionals = self
            .deps
            .storage
            .list_professionals(ticket.tenant_id, service.id)
            .await?;
        if professionals.is_empty() {
            self.outbound
                .send_text(ticket, contact, "Nenhum profissional disponível para este serviço.")
                .await?;
            return self.show_services(ticket, contact, ctx).await;
        }
        ctx.options = professionals
            .into_iter()
            .map(|p| Choice {
                id: p.id,
                label: p.name,
                minutes: 0,
            })
            .collect();
        let text = numbered("Escolha o profissional:", &ctx.options, |c| c.label.clone());
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::ProfessionalSelection, ctx).await
    }

    async fn on_professional(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        if input == BACK {
            return self.show_services(ticket, contact, ctx).await;
        }
        match ctx.pick(input) {
            Some(professional) => {
                ctx.professional = Some(professional);
                self.show_dates(ticket, contact, ctx).await
            }
            None => {
                self.reprompt(ticket, contact, Step::ProfessionalSelection, ctx)
                    .await
            }
        }
    }

    async fn professional(
        &self,
        ticket: &Ticket,
        ctx: &Context,
    ) -> Result<Option<(Professional, i64)>, ZapdeskError> {
        let (Some(service), Some(chosen)) = (&ctx.service, &ctx.professional) else {
            return Ok(None);
        };
        let found = self
            .deps
            .storage
            .list_professionals(ticket.tenant_id, service.id)
            .await?
            .into_iter()
            .find(|p| p.id == chosen.id);
        Ok(found.map(|p| (p, service.minutes)))
    }

    /// Bookable start times of `professional` on `date`, in order.
    async fn free_slots(
        &self,
        professional: &Professional,
        date: NaiveDate,
        duration: i64,
    ) -> Result<Vec<String>, ZapdeskError> {
        if duration <= 0 || !professional.works_on(date.weekday().number_from_monday()) {
            return Ok(Vec::new());
        }
        let (Some(start), Some(end)) = (
            minutes_of(&professional.work_start),
            minutes_of(&professional.work_end),
        ) else {
            warn!(professional_id = professional.id, "invalid working hours");
            return Ok(Vec::new());
        };

        let now = self.local_now();
        let not_before = if date == now.date_naive() {
            i64::from(now.hour() * 60 + now.minute()) + 1
        } else {
            0
        };
        let booked = self
            .deps
            .storage
            .booked_slots(professional.id, &date.format("%Y-%m-%d").to_string())
            .await?;

        let mut slots = Vec::new();
        let mut t = start;
        while t + duration <= end {
            if t >= not_before && !overlaps(&booked, t, duration) {
                slots.push(format_minutes(t));
            }
            t += duration;
        }
        Ok(slots)
    }

    async fn show_dates(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let Some((professional, duration)) = self.professional(ticket, &ctx).await? else {
            return self.show_professionals(ticket, contact, ctx).await;
        };
        let today = self.local_now().date_naive();
        let mut options = Vec::new();
        for ahead in 0..=u64::from(self.config.booking_days_ahead) {
            let Some(date) = today.checked_add_days(Days::new(ahead)) else {
                break;
            };
            if !self.free_slots(&professional, date, duration).await?.is_empty() {
                options.push(Choice {
                    id: options.len() as i64 + 1,
                    label: date.format("%Y-%m-%d").to_string(),
                    minutes: 0,
                });
            }
        }
        if options.is_empty() {
            self.outbound
                .send_text(ticket, contact, "Sem horários livres nos próximos dias.")
                .await?;
            return self.show_professionals(ticket, contact, ctx).await;
        }
        ctx.options = options;
        let text = numbered("Escolha a data:", &ctx.options, |c| display_date(&c.label));
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::DateSelection, ctx).await
    }

    async fn on_date(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        if input == BACK {
            return self.show_professionals(ticket, contact, ctx).await;
        }
        match ctx.pick(input) {
            Some(date) => {
                ctx.date = Some(date.label);
                self.show_times(ticket, contact, ctx).await
            }
            None => self.reprompt(ticket, contact, Step::DateSelection, ctx).await,
        }
    }

    async fn show_times(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let Some((professional, duration)) = self.professional(ticket, &ctx).await? else {
            return self.show_professionals(ticket, contact, ctx).await;
        };
        let Some(date) = ctx
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            return self.show_dates(ticket, contact, ctx).await;
        };
        let slots = self.free_slots(&professional, date, duration).await?;
        if slots.is_empty() {
            self.outbound
                .send_text(ticket, contact, "Não há horários livres nesta data.")
                .await?;
            return self.show_dates(ticket, contact, ctx).await;
        }
        ctx.options = slots
            .into_iter()
            .enumerate()
            .map(|(i, time)| Choice {
                id: i as i64 + 1,
                label: time,
                minutes: 0,
            })
            .collect();
        let title = format!("Horários em {}:", display_date(&date.format("%Y-%m-%d").to_string()));
        let text = numbered(&title, &ctx.options, |c| c.label.clone());
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::TimeSelection, ctx).await
    }

    async fn on_time(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        if input == BACK {
            return self.show_dates(ticket, contact, ctx).await;
        }
        match ctx.pick(input) {
            Some(time) => {
                ctx.time = Some(time.label);
                ctx.options.clear();
                self.show_confirmation(ticket, contact, ctx).await
            }
            None => self.reprompt(ticket, contact, Step::TimeSelection, ctx).await,
        }
    }

    fn summary(ctx: &Context) -> String {
        format!(
            "*Serviço:* {}\n*Profissional:* {}\n*Data:* {}\n*Horário:* {}",
            ctx.service.as_ref().map(|c| c.label.as_str()).unwrap_or("-"),
            ctx.professional.as_ref().map(|c| c.label.as_str()).unwrap_or("-"),
            ctx.date.as_deref().map(display_date).unwrap_or_default(),
            ctx.time.as_deref().unwrap_or("-"),
        )
    }

    async fn show_confirmation(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let text = format!(
            "Confira seu agendamento:\n\n{}\n\nResponda *{CONFIRM}* para confirmar, *{CANCEL}* para desistir ou *{BACK}* para trocar o horário.",
            Self::summary(&ctx)
        );
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::Confirmation, ctx).await
    }

    async fn on_confirmation(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        ctx: Context,
    ) -> Result<(), ZapdeskError> {
        match input.to_uppercase().as_str() {
            CONFIRM => self.confirm(ticket, contact, ctx).await,
            CANCEL => {
                self.finish(ticket, contact, "Agendamento não realizado. Envie AGENDA quando quiser recomeçar.")
                    .await
            }
            BACK => self.show_times(ticket, contact, ctx).await,
            _ => self.show_confirmation(ticket, contact, ctx).await,
        }
    }

    /// Books the chosen slot if it is still free when the lock is held.
    async fn confirm(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let (Some(service), Some(professional), Some(date), Some(time)) = (
            ctx.service.clone(),
            ctx.professional.clone(),
            ctx.date.clone(),
            ctx.time.clone(),
        ) else {
            return self.show_menu(ticket, contact, Some("Dados do agendamento incompletos.")).await;
        };
        let start = minutes_of(&time).unwrap_or(-1);

        let booked = {
            let _slot = self.slot_locks.lock((professional.id, date.clone())).await;
            let taken = self.deps.storage.booked_slots(professional.id, &date).await?;
            if start < 0 || overlaps(&taken, start, service.minutes) {
                None
            } else {
                let request = NewAppointment {
                    tenant_id: ticket.tenant_id,
                    contact_id: contact.id,
                    ticket_id: Some(ticket.id),
                    service_id: service.id,
                    professional_id: professional.id,
                    date: date.clone(),
                    time: time.clone(),
                    duration_minutes: service.minutes,
                };
                match self.deps.storage.book_appointment(&request).await {
                    Ok(appointment) => Some(appointment),
                    Err(ZapdeskError::Conflict(_)) => None,
                    Err(e) => return Err(e),
                }
            }
        };
        self.slot_locks.prune();

        match booked {
            Some(appointment) => {
                info!(
                    ticket_id = ticket.id,
                    appointment_id = appointment.id,
                    professional_id = professional.id,
                    date = %date,
                    time = %time,
                    "appointment confirmed"
                );
                let text = format!("✅ Agendamento confirmado!\n\n{}", Self::summary(&ctx));
                self.finish(ticket, contact, &text).await
            }
            None => {
                debug!(ticket_id = ticket.id, date = %date, time = %time, "slot taken before confirmation");
                self.outbound
                    .send_text(ticket, contact, "Esse horário não está mais disponível. Escolha outro horário.")
                    .await?;
                let mut ctx = ctx;
                ctx.time = None;
                self.show_times(ticket, contact, ctx).await
            }
        }
    }

    async fn show_appointments(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
    ) -> Result<(), ZapdeskError> {
        let today = self.local_now().date_naive().format("%Y-%m-%d").to_string();
        let storage = &self.deps.storage;
        let upcoming = storage
            .list_upcoming_appointments(ticket.tenant_id, contact.id, &today)
            .await?;
        if upcoming.is_empty() {
            return self
                .show_menu(ticket, contact, Some("Você não possui agendamentos."))
                .await;
        }
        let services = storage.list_services(ticket.tenant_id).await?;
        let options: Vec<Choice> = upcoming
            .iter()
            .map(|a| {
                let service = services
                    .iter()
                    .find(|s| s.id == a.service_id)
                    .map(|s| s.name.as_str())
                    .unwrap_or("Serviço");
                Choice {
                    id: a.id,
                    label: format!("{} às {} - {service}", display_date(&a.date), a.time),
                    minutes: a.duration_minutes,
                }
            })
            .collect();
        let mut text = numbered("Seus agendamentos:", &options, |c| c.label.clone());
        text.push_str("\n\nDigite o número de um agendamento para cancelá-lo.");
        self.outbound.send_text(ticket, contact, &text).await?;
        let ctx = Context {
            options,
            ..Context::default()
        };
        self.save(ticket, Step::ViewAppointments, ctx).await
    }

    async fn on_view(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        mut ctx: Context,
    ) -> Result<(), ZapdeskError> {
        if input == BACK {
            return self.show_menu(ticket, contact, None).await;
        }
        let Some(appointment) = ctx.pick(input) else {
            return self.reprompt(ticket, contact, Step::ViewAppointments, ctx).await;
        };
        let text = format!(
            "Deseja cancelar {}?\n\nResponda *{CONFIRM}* para cancelar ou *{BACK}* para voltar.",
            appointment.label
        );
        ctx.appointment = Some(appointment);
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, Step::CancelAppointment, ctx).await
    }

    async fn on_cancel(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        input: &str,
        ctx: Context,
    ) -> Result<(), ZapdeskError> {
        if input == BACK {
            return self.show_appointments(ticket, contact).await;
        }
        let Some(appointment) = ctx.appointment.clone() else {
            return self.show_appointments(ticket, contact).await;
        };
        if input.to_uppercase() != CONFIRM {
            return self.reprompt(ticket, contact, Step::CancelAppointment, ctx).await;
        }
        let cancelled = self
            .deps
            .storage
            .cancel_appointment(ticket.tenant_id, appointment.id)
            .await?;
        let notice = if cancelled {
            info!(ticket_id = ticket.id, appointment_id = appointment.id, "appointment cancelled");
            "Agendamento cancelado."
        } else {
            "Esse agendamento já havia sido cancelado."
        };
        self.show_menu(ticket, contact, Some(notice)).await
    }

    /// Repeats the current list after an unrecognized reply.
    async fn reprompt(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        step: Step,
        ctx: Context,
    ) -> Result<(), ZapdeskError> {
        let text = if step == Step::CancelAppointment {
            format!("Responda *{CONFIRM}* para cancelar ou *{BACK}* para voltar.")
        } else {
            numbered(
                "Opção inválida. Responda com o número de uma das opções:",
                &ctx.options,
                |c| match step {
                    Step::DateSelection => display_date(&c.label),
                    Step::ServiceSelection => format!("{} ({} min)", c.label, c.minutes),
                    _ => c.label.clone(),
                },
            )
        };
        self.outbound.send_text(ticket, contact, &text).await?;
        self.save(ticket, step, ctx).await
    }

    /// Terminal step: hands the ticket back to humans and forgets the state.
    async fn finish(
        &self,
        ticket: &mut Ticket,
        contact: &Contact,
        farewell: &str,
    ) -> Result<(), ZapdeskError> {
        self.outbound.send_text(ticket, contact, farewell).await?;
        let execution = ticket.flow_execution_id.clone();
        ticket.clear_automation();
        self.deps.storage.update_ticket(ticket).await?;
        if let Some(execution) = execution {
            if let Err(e) = self.flows.finish(&execution).await {
                warn!(ticket_id = ticket.id, execution = %execution, error = %e, "failed to finish flow");
            }
        }
        self.states.remove(ticket.tenant_id, ticket.id).await?;
        events::publish_all(
            self.deps.publisher.as_ref(),
            events::ticket_events(ticket, Action::Update),
        )
        .await;
        debug!(ticket_id = ticket.id, step = %Step::Done, "scheduler finished");
        Ok(())
    }

    async fn save(&self, ticket: &Ticket, step: Step, ctx: Context) -> Result<(), ZapdeskError> {
        let now = self.deps.clock.now();
        let context = serde_json::to_string(&ctx)
            .map_err(|e| ZapdeskError::Internal(format!("failed to encode scheduler context: {e}")))?;
        self.states
            .put(ChatbotStateRecord {
                tenant_id: ticket.tenant_id,
                ticket_id: ticket.id,
                contact_id: ticket.contact_id,
                step: step.to_string(),
                context,
                expires_at: now,
                updated_at: now,
            })
            .await?;
        Ok(())
    }

    /// Closes conversations that went quiet. Returns how many were swept.
    pub async fn sweep(&self) -> Result<usize, ZapdeskError> {
        let expired = self.states.expired().await?;
        let storage = &self.deps.storage;
        for state in &expired {
            let ticket = storage.get_ticket(state.ticket_id).await?;
            if state.step != Step::Done.to_string() {
                if let Some(mut ticket) = ticket.clone() {
                    match storage.get_contact(ticket.contact_id).await? {
                        Some(contact) => {
                            if let Err(e) = self
                                .outbound
                                .send_text(&mut ticket, &contact, &self.config.inactivity_message)
                                .await
                            {
                                warn!(ticket_id = ticket.id, error = %e, "inactivity notice not sent");
                            }
                        }
                        None => warn!(ticket_id = ticket.id, "contact of expired conversation is gone"),
                    }
                }
            }
            if let Some(execution) = ticket.and_then(|t| t.flow_execution_id) {
                if let Err(e) = self.flows.finish(&execution).await {
                    warn!(execution = %execution, error = %e, "failed to finish flow");
                }
            }
            self.states.remove(state.tenant_id, state.ticket_id).await?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired scheduler conversations swept");
        }
        Ok(expired.len())
    }

    pub fn spawn_sweep(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every.max(Duration::from_secs(1)));
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = scheduler.sweep().await {
                            warn!(error = %e, "scheduler sweep failed");
                        }
                    }
                }
            }
        })
    }
}
