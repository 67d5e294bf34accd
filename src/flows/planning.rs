//! Slot suggestion, selection and booking.
//!
//! Candidates come from the segment's planning profile against the
//! calendar's busy intervals; a calendar outage degrades to a locally
//! generated set. Selection accepts the structured option value, a numeric
//! reply, or free text interpreted by the analyzer against the offered list
//! only. Paid lesson types hand the final confirmation to the payment
//! webhook.

use chrono::{DateTime, Duration};
use serde_json::Value;

use crate::analysis::SlotIntent;
use crate::calendar::{EventRequest, color_for_status, event_title};
use crate::error::Result;
use crate::flows::{Ctx, Turn, TurnInput, View, intake};
use crate::guard::Reply;
use crate::i18n::{Lang, t};
use crate::menu::{self, MenuOption};
use crate::payments::order_id;
use crate::segment::Segment;
use crate::slots::{self, PAGE_SIZE};
use crate::state::{AttrPatch, CandidateSlot, IntakeStep, LessonType, PendingIntent};

/// In-person lessons happen at the practice's fixed location.
const PRACTICE_LOCATION: &str = "Science Park";

fn default_lesson_type(segment: Segment) -> LessonType {
    match segment {
        Segment::New => LessonType::Trial,
        _ => LessonType::Regular,
    }
}

fn slot_options(page: &[CandidateSlot], has_more: bool, lang: Lang) -> Vec<MenuOption> {
    let mut options: Vec<MenuOption> = page
        .iter()
        .map(|s| MenuOption::new(s.label.clone(), s.start.to_rfc3339()))
        .collect();
    if has_more {
        options.push(MenuOption::new(t("opt_more_options", lang), "more_options"));
    }
    options
}

pub async fn handle(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    match input {
        TurnInput::Enter => suggest(ctx, view).await,
        TurnInput::Message(text) => select(ctx, view, text).await,
    }
}

/// Offer a page of candidate slots, or escalate when there are none at all.
async fn suggest(ctx: &Ctx, view: &View) -> Result<Turn> {
    let lang = view.lang;
    let profile_view = intake::merged_profile(view);

    // No slots for an unaccompanied minor until a guardian is on file.
    if profile_view.needs_guardian() {
        return Ok(Turn::chain_to(PendingIntent::Intake)
            .reply(Reply::text(t("planning_guardian_first", lang)))
            .step(IntakeStep::GuardianName));
    }

    let lesson_type = view
        .conv
        .lesson_type
        .unwrap_or_else(|| default_lesson_type(view.segment));
    let profile = slots::profile_for(view.segment);
    let now = ctx.now();
    let horizon = now + Duration::days(profile.days_ahead);

    let mut candidates = match ctx.calendar.busy(now, horizon).await {
        Ok(busy) => slots::generate(&profile, lesson_type, &busy, now, lang),
        Err(e) => {
            tracing::warn!(conversation_id = view.conversation_id, error = %e, "freebusy unavailable; using fallback slots");
            slots::fallback(lesson_type, view.segment, now, lang)
        }
    };
    if candidates.is_empty() {
        candidates = slots::fallback(lesson_type, view.segment, now, lang);
    }
    if candidates.is_empty() {
        // Fully booked horizon: a human takes over the search.
        return Ok(Turn::await_in(PendingIntent::Handoff)
            .reply(Reply::text(t("planning_none", lang)))
            .label(crate::guard::HANDOFF_LABEL)
            .assign_handoff());
    }

    if let Some(prefs) = &profile_view.preferred_times {
        candidates = slots::filter_by_preferences(candidates, prefs);
    }

    let mut page = view.conv.slot_page.max(0) as usize;
    if page * PAGE_SIZE >= candidates.len() {
        page = 0;
    }
    let page_slots: Vec<CandidateSlot> = candidates
        .iter()
        .skip(page * PAGE_SIZE)
        .take(PAGE_SIZE)
        .cloned()
        .collect();
    let has_more = candidates.len() > (page + 1) * PAGE_SIZE || page > 0;

    // Later pages carry their own numbered header; paging must never re-send
    // the exact previous prompt body.
    let prompt = if page == 0 {
        t("planning_prompt", lang)
    } else {
        format!("{} ({})", t("planning_prompt_more", lang), page + 1)
    };

    let suggested = serde_json::to_value(&page_slots).unwrap_or(Value::Array(vec![]));
    Ok(Turn::await_in(PendingIntent::Planning)
        .reply(Reply::menu(
            prompt,
            slot_options(&page_slots, has_more, lang),
        ))
        .conv(
            AttrPatch::new()
                .set("suggested_slots", suggested)
                .set("slot_page", Value::from(page as i64))
                .set_str("lesson_type", lesson_type.to_string()),
        ))
}

/// Resolve the customer's answer against the offered slots.
async fn select(ctx: &Ctx, view: &View, text: &str) -> Result<Turn> {
    let lang = view.lang;
    let offered = &view.conv.suggested_slots;
    if offered.is_empty() {
        return Ok(Turn::chain_to(PendingIntent::Planning));
    }

    let options = slot_options(offered, true, lang);
    if let Some(value) = menu::resolve(text, &options) {
        if value == "more_options" {
            return Ok(Turn::chain_to(PendingIntent::Planning).conv(
                AttrPatch::new().set("slot_page", Value::from(view.conv.slot_page + 1)),
            ));
        }
        if let Ok(start) = DateTime::parse_from_rfc3339(&value) {
            if let Some(slot) = offered.iter().find(|s| s.start == start) {
                return book(ctx, view, slot.clone()).await;
            }
        }
    }

    // Free text like "woensdag dan maar" goes through the analyzer, which
    // may only pick from the offered list.
    match ctx.analyzer.interpret_slot_choice(text, offered).await {
        Ok(interp) => match interp.intent {
            SlotIntent::Select => {
                if let Some(start) = interp.chosen_start {
                    if let Some(slot) = offered.iter().find(|s| s.start == start) {
                        return book(ctx, view, slot.clone()).await;
                    }
                }
            }
            SlotIntent::MoreOptions => {
                return Ok(Turn::chain_to(PendingIntent::Planning).conv(
                    AttrPatch::new().set("slot_page", Value::from(view.conv.slot_page + 1)),
                ));
            }
            SlotIntent::Invalid => {}
        },
        Err(e) => {
            tracing::debug!(conversation_id = view.conversation_id, error = %e, "slot interpretation unavailable");
        }
    }

    Ok(Turn::await_in(PendingIntent::Planning)
        .reply(Reply::text(t("planning_invalid", lang)))
        .reply(Reply::menu(t("planning_prompt", lang), options)))
}

/// Put the lesson on the calendar and either confirm (trial) or send the
/// customer to checkout (paid types).
async fn book(ctx: &Ctx, view: &View, slot: CandidateSlot) -> Result<Turn> {
    let lang = view.lang;
    let profile_view = intake::merged_profile(view);
    let lesson_type = view
        .conv
        .lesson_type
        .unwrap_or_else(|| default_lesson_type(view.segment));

    let name = profile_view
        .learner_name
        .clone()
        .unwrap_or_else(|| match lang {
            Lang::Nl => "Leerling".to_string(),
            Lang::En => "Student".to_string(),
        });
    let status = if lesson_type.is_paid() { "voorstel" } else { "intake" };
    let location = matches!(profile_view.lesson_mode.as_deref(), Some("in_person"))
        .then(|| PRACTICE_LOCATION.to_string());

    let event = EventRequest {
        title: event_title(&name, lesson_type.label(lang), status, location.as_deref()),
        start: slot.start,
        end: slot.end,
        color_id: color_for_status(status).to_string(),
        location,
        description: profile_view.goals.clone(),
    };

    let mut turn = Turn::chain_to(PendingIntent::EmailRequest)
        .contact(AttrPatch::new().set_bool("lesson_booked", true))
        .conv(
            AttrPatch::new()
                .set("suggested_slots", Value::Null)
                .set("slot_page", Value::from(0)),
        )
        .label("status:booked");

    if let Err(e) = ctx.calendar.create_event(&event).await {
        tracing::warn!(conversation_id = view.conversation_id, error = %e, "calendar event creation failed");
        turn = turn.reply(Reply::note(format!(
            "Agenda-afspraak kon niet worden aangemaakt: {} om {}",
            event.title, slot.label
        )));
    }

    if lesson_type.is_paid() && ctx.payments_enabled {
        let order = order_id(&ctx.order_prefix, ctx.now(), view.conversation_id);
        match ctx
            .payments
            .create_checkout(&order, view.segment, lesson_type)
            .await
        {
            Ok(url) => {
                turn = turn
                    .reply(Reply::text(format!("{} {url}", t("payment_link", lang))))
                    .conv(AttrPatch::new().set_str("order_id", order));
                return Ok(turn);
            }
            Err(e) => {
                tracing::warn!(conversation_id = view.conversation_id, order_id = %order, error = %e, "checkout creation failed");
                turn = turn.reply(Reply::note(format!(
                    "Betaallink kon niet worden aangemaakt voor order {order}"
                )));
            }
        }
    }

    Ok(turn.reply(Reply::text(t("planning_booked", lang))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SlotInterpretation;
    use crate::flows::Control;
    use crate::flows::testutil::*;
    use chrono::FixedOffset;
    use serde_json::{Map, json};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn slot(start: &str, end: &str, label: &str) -> Value {
        json!({"start": start, "end": end, "label": label})
    }

    fn planning_view(conv_extra: Value, contact: Value) -> View {
        let mut conv = map(json!({"pending_intent": "planning"}));
        for (k, v) in map(conv_extra) {
            conv.insert(k, v);
        }
        view_with(conv, map(contact))
    }

    #[tokio::test]
    async fn suggest_offers_at_most_a_page() {
        let h = harness();
        *h.calendar.busy.lock().unwrap() = Some(vec![]);
        let view = planning_view(
            json!({"lesson_type": "regular"}),
            json!({"has_completed_intake": true, "customer_since": "2025-01-01"}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Enter).await.unwrap();
        assert_eq!(turn.control, Control::Await);
        let menu = &turn.replies[0];
        assert!(menu.options.len() <= PAGE_SIZE + 1);
        assert_eq!(menu.options.last().unwrap().value, "more_options");
        assert!(turn.conv_patch.0.contains_key("suggested_slots"));
    }

    #[tokio::test]
    async fn later_pages_use_a_distinct_prompt() {
        let h = harness();
        *h.calendar.busy.lock().unwrap() = Some(vec![]);
        let view = planning_view(
            json!({"lesson_type": "regular", "slot_page": 1}),
            json!({"has_completed_intake": true, "is_adult": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Enter).await.unwrap();
        assert!(
            turn.replies[0]
                .body
                .starts_with(&t("planning_prompt_more", Lang::Nl))
        );
    }

    #[tokio::test]
    async fn calendar_outage_uses_fallback() {
        let h = harness();
        // busy unset: FakeCalendar errors.
        let view = planning_view(
            json!({"lesson_type": "trial"}),
            json!({"has_completed_intake": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Enter).await.unwrap();
        assert!(!turn.replies[0].options.is_empty());
    }

    #[tokio::test]
    async fn unaccompanied_minor_is_sent_to_guardian_step() {
        let h = harness();
        let view = planning_view(
            json!({"lesson_type": "trial"}),
            json!({"is_adult": false, "for_who": "self", "has_completed_intake": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Enter).await.unwrap();
        assert_eq!(turn.next, PendingIntent::Intake);
        assert_eq!(turn.conv_patch.0.get("intake_step"), Some(&json!("guardian_name")));
    }

    #[tokio::test]
    async fn numeric_selection_books_trial_and_creates_event() {
        let h = harness();
        let view = planning_view(
            json!({
                "lesson_type": "trial",
                "suggested_slots": [
                    slot("2026-09-02T14:00:00+02:00", "2026-09-02T14:30:00+02:00", "wo 2 sep 14:00"),
                    slot("2026-09-02T15:00:00+02:00", "2026-09-02T15:30:00+02:00", "wo 2 sep 15:00"),
                ],
            }),
            json!({"learner_name": "Maria", "lesson_mode": "in_person", "is_adult": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Message("1".into()))
            .await
            .unwrap();

        assert_eq!(turn.next, PendingIntent::EmailRequest);
        assert_eq!(turn.contact_patch.0.get("lesson_booked"), Some(&json!(true)));
        assert!(turn.labels.contains(&"status:booked".to_string()));
        assert!(turn.replies.iter().any(|r| r.body.contains("ingepland")));

        let created = h.calendar.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Maria – proefles – intake – Science Park");
        assert_eq!(created[0].color_id, "1");
    }

    #[tokio::test]
    async fn paid_booking_sends_checkout_link() {
        let h = harness();
        *h.payments.checkout_url.lock().unwrap() = Some("https://pay.example/abc".into());
        let view = planning_view(
            json!({
                "lesson_type": "regular",
                "suggested_slots": [
                    slot("2026-09-02T14:00:00+02:00", "2026-09-02T15:00:00+02:00", "wo 2 sep 14:00"),
                ],
            }),
            json!({"learner_name": "Maria", "is_adult": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Message("1".into()))
            .await
            .unwrap();

        assert!(
            turn.replies
                .iter()
                .any(|r| r.body.contains("https://pay.example/abc"))
        );
        // Confirmation is deferred to the payment webhook.
        assert!(!turn.replies.iter().any(|r| r.body.contains("ingepland")));
        let order = turn.conv_patch.0.get("order_id").unwrap().as_str().unwrap();
        assert!(order.starts_with("TB-"));
        assert!(order.ends_with("-1"));

        let created = h.calendar.created.lock().unwrap();
        assert_eq!(created[0].color_id, "11"); // voorstel
    }

    #[tokio::test]
    async fn checkout_failure_degrades_to_confirmation_with_note() {
        let h = harness();
        // checkout_url unset: FakePayments errors.
        let view = planning_view(
            json!({
                "lesson_type": "regular",
                "suggested_slots": [
                    slot("2026-09-02T14:00:00+02:00", "2026-09-02T15:00:00+02:00", "wo 2 sep 14:00"),
                ],
            }),
            json!({"is_adult": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Message("1".into()))
            .await
            .unwrap();
        assert!(turn.replies.iter().any(|r| r.private));
        assert!(turn.replies.iter().any(|r| r.body.contains("ingepland")));
    }

    #[tokio::test]
    async fn more_options_pages_forward() {
        let h = harness();
        let view = planning_view(
            json!({
                "lesson_type": "regular",
                "slot_page": 0,
                "suggested_slots": [
                    slot("2026-09-02T14:00:00+02:00", "2026-09-02T15:00:00+02:00", "wo 2 sep 14:00"),
                ],
            }),
            json!({"is_adult": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Message("meer opties".into()))
            .await
            .unwrap();
        assert_eq!(turn.next, PendingIntent::Planning);
        assert_eq!(turn.control, Control::Continue);
        assert_eq!(turn.conv_patch.0.get("slot_page"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn free_text_selection_goes_through_analyzer() {
        let h = harness();
        let start: DateTime<FixedOffset> =
            DateTime::parse_from_rfc3339("2026-09-02T14:00:00+02:00").unwrap();
        *h.analyzer.slot.lock().unwrap() = Some(SlotInterpretation {
            intent: SlotIntent::Select,
            chosen_start: Some(start),
        });
        let view = planning_view(
            json!({
                "lesson_type": "trial",
                "suggested_slots": [
                    slot("2026-09-02T14:00:00+02:00", "2026-09-02T14:30:00+02:00", "wo 2 sep 14:00"),
                ],
            }),
            json!({"is_adult": true}),
        );
        let turn = handle(
            &h.orchestrator.ctx,
            &view,
            &TurnInput::Message("doe woensdag begin van de middag maar".into()),
        )
        .await
        .unwrap();
        assert_eq!(turn.next, PendingIntent::EmailRequest);
    }

    #[tokio::test]
    async fn unresolvable_selection_reprompts_same_list() {
        let h = harness();
        let view = planning_view(
            json!({
                "lesson_type": "trial",
                "suggested_slots": [
                    slot("2026-09-02T14:00:00+02:00", "2026-09-02T14:30:00+02:00", "wo 2 sep 14:00"),
                ],
            }),
            json!({"is_adult": true}),
        );
        let turn = handle(&h.orchestrator.ctx, &view, &TurnInput::Message("maakt niet uit".into()))
            .await
            .unwrap();
        assert_eq!(turn.next, PendingIntent::Planning);
        assert_eq!(turn.control, Control::Await);
        assert!(turn.replies[0].body.contains("stond er niet tussen"));
    }
}
