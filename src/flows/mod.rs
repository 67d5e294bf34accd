//! Flow handlers and the driver loop.
//!
//! Every handler is a function from `(context, view, input)` to a [`Turn`]:
//! the replies to send, attribute patches to merge, and the next pending
//! intent. Handlers never call each other; a handler that wants another
//! flow to run next returns `Control::Continue` and the driver re-dispatches
//! with an `Enter` input. That keeps every transition a pure-ish, testable
//! step and the side effects in one place.

pub mod intake;
pub mod menus;
pub mod planning;
pub mod prefill;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};

use crate::analysis::Analyzer;
use crate::calendar::Calendar;
use crate::error::{Error, Result};
use crate::guard::{OutgoingGuard, Reply};
use crate::i18n::{Lang, detect_language};
use crate::payments::Payments;
use crate::platform::Messaging;
use crate::segment::{self, Segment};
use crate::state::{AttrPatch, ContactProfile, ConversationState, IntakeStep, PendingIntent};

/// Messages at or below this length are greetings, not prefill material.
pub const PREFILL_MIN_LEN: usize = 20;

/// The verbatim administrative reset command.
pub const WIPE_COMMAND: &str = "WIPECONTACTS";

/// Hard cap on handler chaining per inbound message.
const MAX_CHAIN: usize = 8;

// ── Turn ────────────────────────────────────────────────────────────

/// What the driver does after applying a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Wait for the next customer message.
    Await,
    /// Re-dispatch immediately with an `Enter` input for `next`.
    Continue,
}

/// Input to one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    /// The flow was just entered (chained from another handler); send the
    /// opening prompt.
    Enter,
    /// A customer message (interactive replies already unwrapped).
    Message(String),
}

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub replies: Vec<Reply>,
    pub next: PendingIntent,
    pub conv_patch: AttrPatch,
    pub contact_patch: AttrPatch,
    pub labels: Vec<String>,
    pub assign_to_handoff: bool,
    pub control: Control,
}

impl Turn {
    /// Await the next message in state `next`.
    pub fn await_in(next: PendingIntent) -> Self {
        Self {
            replies: Vec::new(),
            next,
            conv_patch: AttrPatch::new(),
            contact_patch: AttrPatch::new(),
            labels: Vec::new(),
            assign_to_handoff: false,
            control: Control::Await,
        }
    }

    /// Chain straight into `next` without waiting for input.
    pub fn chain_to(next: PendingIntent) -> Self {
        Self {
            control: Control::Continue,
            ..Self::await_in(next)
        }
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn conv(mut self, patch: AttrPatch) -> Self {
        self.conv_patch.merge(patch);
        self
    }

    pub fn contact(mut self, patch: AttrPatch) -> Self {
        self.contact_patch.merge(patch);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn assign_handoff(mut self) -> Self {
        self.assign_to_handoff = true;
        self
    }

    pub fn step(mut self, step: IntakeStep) -> Self {
        self.conv_patch = self.conv_patch.set_str("intake_step", step.to_string());
        self
    }
}

// ── Context & view ──────────────────────────────────────────────────

/// Shared collaborators, injected once at startup.
pub struct Ctx {
    pub platform: Arc<dyn Messaging>,
    pub analyzer: Arc<dyn Analyzer>,
    pub calendar: Arc<dyn Calendar>,
    pub payments: Arc<dyn Payments>,
    pub guard: OutgoingGuard,
    pub handoff_agent_id: Option<i64>,
    pub analysis_enabled: bool,
    pub payments_enabled: bool,
    pub order_prefix: String,
    pub tz_offset_minutes: i32,
}

impl Ctx {
    /// Current time in the business timezone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        match FixedOffset::east_opt(self.tz_offset_minutes * 60) {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Utc::now().fixed_offset(),
        }
    }
}

/// Snapshot of one conversation, rebuilt from the raw attribute maps and
/// kept in sync with patches while handlers chain.
#[derive(Debug, Clone)]
pub struct View {
    pub conversation_id: i64,
    pub contact_id: i64,
    pub conv_raw: Map<String, Value>,
    pub contact_raw: Map<String, Value>,
    pub conv: ConversationState,
    pub contact: ContactProfile,
    pub segment: Segment,
    pub lang: Lang,
}

impl View {
    pub fn new(
        conversation_id: i64,
        contact_id: i64,
        conv_raw: Map<String, Value>,
        contact_raw: Map<String, Value>,
    ) -> Self {
        let conv = ConversationState::from_map(&conv_raw);
        let contact = ContactProfile::from_map(&contact_raw);
        let segment = segment::classify(&contact);
        let lang = conv.lang(&contact);
        Self {
            conversation_id,
            contact_id,
            conv_raw,
            contact_raw,
            conv,
            contact,
            segment,
            lang,
        }
    }

    /// Fold a turn's patches into the snapshot so chained handlers see them.
    fn absorb(&mut self, turn: &Turn) {
        for (k, v) in &turn.conv_patch.0 {
            self.conv_raw.insert(k.clone(), v.clone());
        }
        for (k, v) in &turn.contact_patch.0 {
            self.contact_raw.insert(k.clone(), v.clone());
        }
        self.conv = ConversationState::from_map(&self.conv_raw);
        self.contact = ContactProfile::from_map(&self.contact_raw);
        self.segment = segment::classify(&self.contact);
        self.lang = self.conv.lang(&self.contact);
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// The single driver: reads state, runs pre-checks, dispatches the pending
/// intent, applies side effects, and chains until a handler awaits input.
pub struct Orchestrator {
    pub ctx: Ctx,
}

impl Orchestrator {
    pub fn new(ctx: Ctx) -> Self {
        Self { ctx }
    }

    /// Handle one deduplicated inbound customer message.
    pub async fn handle_message(
        &self,
        conversation_id: i64,
        contact_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<()> {
        // Re-read both records on every message: state may have changed
        // out-of-band (human operator, duplicate delivery).
        let conv_raw = self
            .ctx
            .platform
            .conversation_attrs(conversation_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(conversation_id, error = %e, "conversation read failed");
                Map::new()
            });
        let contact_raw = self
            .ctx
            .platform
            .contact_attrs(contact_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(contact_id, error = %e, "contact read failed");
                Map::new()
            });

        let mut view = View::new(conversation_id, contact_id, conv_raw, contact_raw);

        // Language: sticky once detected, detected fresh on first contact.
        if view.conv.language.is_none() && view.contact.language.is_none() {
            view.lang = detect_language(text);
        }

        let mut conv_out = AttrPatch::new()
            .set("last_processed_message_id", Value::from(message_id))
            .set_str("language", view.lang.as_str().to_string());
        // Self-healing caches on the contact; never read back as truth.
        let mut contact_out = AttrPatch::new()
            .set_str("segment", view.segment.to_string())
            .set_str("language", view.lang.as_str().to_string());

        let first_turn = self.initial_turn(&view, text).await;
        let escalated = self
            .run_turns(&mut view, first_turn, &mut conv_out, &mut contact_out)
            .await?;
        if escalated {
            conv_out = conv_out.set_str("pending_intent", PendingIntent::Handoff.to_string());
        }

        if !self
            .ctx
            .platform
            .merge_conversation_attrs(conversation_id, &conv_out)
            .await
        {
            tracing::warn!(conversation_id, "conversation state write failed");
        }
        if !self
            .ctx
            .platform
            .merge_contact_attrs(contact_id, &contact_out)
            .await
        {
            tracing::warn!(contact_id, "contact write failed");
        }
        Ok(())
    }

    /// Pre-checks, then the stored pending intent.
    async fn initial_turn(&self, view: &View, text: &str) -> Result<Turn> {
        let trimmed = text.trim();

        // Administrative reset, regardless of current flow.
        if trimmed == WIPE_COMMAND {
            return menus::wipe(&self.ctx, view, &TurnInput::Enter).await;
        }

        // First-contact prefill: only outside any flow, once, for messages
        // long enough to carry real intake content.
        if view.conv.pending_intent == PendingIntent::Idle
            && !view.conv.has_been_prefilled
            && self.ctx.analysis_enabled
            && trimmed.chars().count() > PREFILL_MIN_LEN
        {
            match prefill::run(&self.ctx, view, trimmed).await {
                Some(turn) => return Ok(turn),
                None => {
                    // Nothing extractable; fall through to the normal route
                    // but don't try again on the next message.
                    let mut turn =
                        self.dispatch(view, view.conv.pending_intent, &TurnInput::Message(trimmed.to_string()))
                            .await?;
                    turn.conv_patch = std::mem::take(&mut turn.conv_patch)
                        .set_bool("has_been_prefilled", true);
                    return Ok(turn);
                }
            }
        }

        self.dispatch(view, view.conv.pending_intent, &TurnInput::Message(trimmed.to_string()))
            .await
    }

    async fn dispatch(&self, view: &View, intent: PendingIntent, input: &TurnInput) -> Result<Turn> {
        use PendingIntent::*;
        match intent {
            Idle | MenuSelection => menus::main(&self.ctx, view, input).await,
            IntakeChoice => intake::choice(&self.ctx, view, input).await,
            Intake => intake::scripted(&self.ctx, view, input).await,
            IntakeFreeText => intake::free_text(&self.ctx, view, input).await,
            IntakeFreeTextConfirm => intake::free_text_confirm(&self.ctx, view, input).await,
            PrefillConfirmation => prefill::confirmation(&self.ctx, view, input).await,
            PrefillAction => prefill::action(&self.ctx, view, input).await,
            Planning => planning::handle(&self.ctx, view, input).await,
            InfoMenu | InfoMenuFollowUp => menus::info(&self.ctx, view, input).await,
            TariffsFollowUp => menus::tariffs_follow_up(&self.ctx, view, input).await,
            HandoffMenu => menus::handoff_menu(&self.ctx, view, input).await,
            Handoff => menus::handoff_silent(&self.ctx, view, input).await,
            EmailRequest => menus::email(&self.ctx, view, input).await,
            WipeConfirmation => menus::wipe(&self.ctx, view, input).await,
        }
    }

    /// Apply turns until a handler awaits. Returns whether the outgoing
    /// guard escalated.
    async fn run_turns(
        &self,
        view: &mut View,
        first: Result<Turn>,
        conv_out: &mut AttrPatch,
        contact_out: &mut AttrPatch,
    ) -> Result<bool> {
        let mut turn = first?;
        // Comparison basis for the duplicate guard. Every delivered
        // customer-visible reply becomes the next basis, within a turn and
        // across chained turns, so an interleaved error text keeps a
        // legitimate re-prompt from reading as a repeat.
        let mut last_body = view.conv.last_bot_message.clone();
        for hop in 0.. {
            if hop >= MAX_CHAIN {
                return Err(Error::Flow(format!(
                    "handler chain exceeded {MAX_CHAIN} hops in conversation {}",
                    view.conversation_id
                )));
            }

            // Side effects first: replies through the guard.
            for reply in &turn.replies {
                let delivery = self
                    .ctx
                    .guard
                    .deliver(
                        self.ctx.platform.as_ref(),
                        view.conversation_id,
                        reply,
                        last_body.as_deref(),
                        view.conv.pending_intent == PendingIntent::Handoff,
                        view.lang,
                    )
                    .await
                    .map_err(Error::Platform)?;
                if delivery.escalated {
                    conv_out.merge(turn.conv_patch.clone());
                    contact_out.merge(turn.contact_patch.clone());
                    return Ok(true);
                }
                if let Some(last) = delivery.last_bot_message {
                    turn.conv_patch = std::mem::take(&mut turn.conv_patch)
                        .set_str("last_bot_message", last.clone());
                    last_body = Some(last);
                }
            }

            if !turn.labels.is_empty() {
                let labels: Vec<&str> = turn.labels.iter().map(String::as_str).collect();
                self.ctx
                    .platform
                    .add_labels(view.conversation_id, &labels)
                    .await;
            }
            if turn.assign_to_handoff {
                if let Some(agent_id) = self.ctx.handoff_agent_id {
                    self.ctx.platform.assign(view.conversation_id, agent_id).await;
                }
            }

            turn.conv_patch = std::mem::take(&mut turn.conv_patch)
                .set_str("pending_intent", turn.next.to_string());

            view.absorb(&turn);
            conv_out.merge(turn.conv_patch.clone());
            contact_out.merge(turn.contact_patch.clone());

            match turn.control {
                Control::Await => return Ok(false),
                Control::Continue => {
                    let next = turn.next;
                    turn = self.dispatch(view, next, &TurnInput::Enter).await?;
                }
            }
        }
        unreachable!("loop exits via return");
    }
}

// ── Test fakes ──────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::analysis::{IntakeAnalysis, SlotInterpretation};
    use crate::calendar::{BusyInterval, EventRequest};
    use crate::error::{AnalysisError, CalendarError, PaymentError, PlatformError};
    use crate::menu::MenuOption;
    use crate::state::LessonType;

    /// Recorded outbound message.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Sent {
        pub body: String,
        pub options: Vec<MenuOption>,
        pub private: bool,
    }

    #[derive(Default)]
    pub struct FakePlatform {
        pub conv_attrs: Mutex<Map<String, Value>>,
        pub contact_attrs: Mutex<Map<String, Value>>,
        pub sent: Mutex<Vec<Sent>>,
        pub labels: Mutex<Vec<String>>,
        pub assigned_to: Mutex<Option<i64>>,
        pub fail_sends: Mutex<bool>,
    }

    impl FakePlatform {
        pub fn bodies(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|s| s.body.clone()).collect()
        }

        pub fn last_menu(&self) -> Option<Sent> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| !s.options.is_empty())
                .cloned()
        }
    }

    #[async_trait]
    impl Messaging for FakePlatform {
        async fn contact_attrs(&self, _id: i64) -> std::result::Result<Map<String, Value>, PlatformError> {
            Ok(self.contact_attrs.lock().unwrap().clone())
        }

        async fn merge_contact_attrs(&self, _id: i64, patch: &AttrPatch) -> bool {
            let mut attrs = self.contact_attrs.lock().unwrap();
            for (k, v) in &patch.0 {
                attrs.insert(k.clone(), v.clone());
            }
            true
        }

        async fn conversation_attrs(
            &self,
            _id: i64,
        ) -> std::result::Result<Map<String, Value>, PlatformError> {
            Ok(self.conv_attrs.lock().unwrap().clone())
        }

        async fn merge_conversation_attrs(&self, _id: i64, patch: &AttrPatch) -> bool {
            let mut attrs = self.conv_attrs.lock().unwrap();
            for (k, v) in &patch.0 {
                attrs.insert(k.clone(), v.clone());
            }
            true
        }

        async fn send_text(
            &self,
            _id: i64,
            body: &str,
            private: bool,
        ) -> std::result::Result<(), PlatformError> {
            if *self.fail_sends.lock().unwrap() {
                return Err(PlatformError::RequestFailed {
                    endpoint: "messages".to_string(),
                    reason: "forced failure".to_string(),
                });
            }
            self.sent.lock().unwrap().push(Sent {
                body: body.to_string(),
                options: Vec::new(),
                private,
            });
            Ok(())
        }

        async fn send_menu(
            &self,
            _id: i64,
            body: &str,
            options: &[MenuOption],
        ) -> std::result::Result<(), PlatformError> {
            self.sent.lock().unwrap().push(Sent {
                body: body.to_string(),
                options: options.to_vec(),
                private: false,
            });
            Ok(())
        }

        async fn add_labels(&self, _id: i64, labels: &[&str]) -> bool {
            let mut all = self.labels.lock().unwrap();
            for l in labels {
                all.push((*l).to_string());
            }
            true
        }

        async fn assign(&self, _id: i64, agent_id: i64) -> bool {
            *self.assigned_to.lock().unwrap() = Some(agent_id);
            true
        }
    }

    #[derive(Default)]
    pub struct FakeAnalyzer {
        pub intake: Mutex<Option<IntakeAnalysis>>,
        pub slot: Mutex<Option<SlotInterpretation>>,
        pub intake_calls: Mutex<usize>,
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze_intake(
            &self,
            _message: &str,
        ) -> std::result::Result<Option<IntakeAnalysis>, AnalysisError> {
            *self.intake_calls.lock().unwrap() += 1;
            Ok(self.intake.lock().unwrap().clone())
        }

        async fn interpret_slot_choice(
            &self,
            _message: &str,
            _slots: &[crate::state::CandidateSlot],
        ) -> std::result::Result<SlotInterpretation, AnalysisError> {
            self.slot
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AnalysisError::NotConfigured)
        }
    }

    #[derive(Default)]
    pub struct FakeCalendar {
        pub busy: Mutex<Option<Vec<BusyInterval>>>,
        pub created: Mutex<Vec<EventRequest>>,
    }

    #[async_trait]
    impl Calendar for FakeCalendar {
        async fn busy(
            &self,
            _from: DateTime<FixedOffset>,
            _to: DateTime<FixedOffset>,
        ) -> std::result::Result<Vec<BusyInterval>, CalendarError> {
            self.busy
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| CalendarError::FreeBusy("fake outage".to_string()))
        }

        async fn create_event(
            &self,
            event: &EventRequest,
        ) -> std::result::Result<(), CalendarError> {
            self.created.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakePayments {
        pub checkout_url: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Payments for FakePayments {
        async fn create_checkout(
            &self,
            _order_id: &str,
            _segment: Segment,
            _lesson_type: LessonType,
        ) -> std::result::Result<String, PaymentError> {
            self.checkout_url
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| PaymentError::Checkout("fake outage".to_string()))
        }
    }

    /// Build an orchestrator over fakes. Returns the shared fakes so tests
    /// can program and inspect them.
    pub struct Harness {
        pub orchestrator: Orchestrator,
        pub platform: Arc<FakePlatform>,
        pub analyzer: Arc<FakeAnalyzer>,
        pub calendar: Arc<FakeCalendar>,
        pub payments: Arc<FakePayments>,
    }

    pub fn harness() -> Harness {
        let platform = Arc::new(FakePlatform::default());
        let analyzer = Arc::new(FakeAnalyzer::default());
        let calendar = Arc::new(FakeCalendar::default());
        let payments = Arc::new(FakePayments::default());
        let ctx = Ctx {
            platform: platform.clone(),
            analyzer: analyzer.clone(),
            calendar: calendar.clone(),
            payments: payments.clone(),
            guard: OutgoingGuard::new(Some(77)),
            handoff_agent_id: Some(77),
            analysis_enabled: true,
            payments_enabled: true,
            order_prefix: "TB".to_string(),
            tz_offset_minutes: 120,
        };
        Harness {
            orchestrator: Orchestrator::new(ctx),
            platform,
            analyzer,
            calendar,
            payments,
        }
    }

    pub fn view_with(
        conv: Map<String, Value>,
        contact: Map<String, Value>,
    ) -> View {
        View::new(1, 2, conv, contact)
    }
}
