//! First-message prefill: extract intake fields from a long opening message
//! so a customer who already told us everything isn't walked through the
//! wizard again.

use serde_json::Value;

use crate::error::Result;
use crate::flows::{Ctx, Turn, TurnInput, View, intake, menus};
use crate::guard::Reply;
use crate::i18n::t;
use crate::menu::{self, MenuOption};
use crate::state::{AttrPatch, LessonType, PendingIntent};

/// Try to prefill from the opening message. `None` means nothing usable was
/// extracted and the message should take the normal route.
pub async fn run(ctx: &Ctx, view: &View, text: &str) -> Option<Turn> {
    let analysis = match ctx.analyzer.analyze_intake(text).await {
        Ok(result) => result,
        Err(e) => {
            tracing::info!(conversation_id = view.conversation_id, error = %e, "prefill analysis unavailable");
            None
        }
    }?;
    if !analysis.is_sufficient() {
        return None;
    }

    let lang = view.lang;
    let patch = analysis.to_patch();
    let mut turn = Turn::await_in(PendingIntent::PrefillConfirmation)
        // Extracted fields are merged right away; the confirmation below
        // only decides whether to keep going or re-do intake.
        .contact(patch.clone())
        .conv(
            AttrPatch::new()
                .set_bool("has_been_prefilled", true)
                .set("proposed_fields", Value::Object(patch.0)),
        );
    let summary = format!(
        "{}\n{}",
        t("prefill_summary_header", lang),
        analysis.summary_lines(lang).join("\n")
    );
    turn = turn
        .reply(Reply::text(summary))
        .reply(Reply::menu(
            t("prefill_confirm_prompt", lang),
            intake::confirm_options(lang),
        ));
    Some(turn)
}

/// Confirm or reject the prefilled fields.
pub async fn confirmation(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = intake::confirm_options(lang);

    let text = match input {
        TurnInput::Enter => {
            let mut turn = Turn::await_in(PendingIntent::PrefillConfirmation);
            for reply in intake::summary_reply(&view.conv.proposed, "prefill_summary_header", lang)
            {
                turn = turn.reply(reply);
            }
            return Ok(turn);
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("confirm_all") => Ok(Turn::chain_to(PendingIntent::PrefillAction)
            .contact(AttrPatch::new().set_bool("has_completed_intake", true))
            .conv(
                AttrPatch::new()
                    .set("proposed_fields", Value::Null)
                    .set("confirm_retries", Value::from(0)),
            )),
        Some("correct_all") => Ok(Turn::chain_to(PendingIntent::IntakeChoice)
            .conv(AttrPatch::new().set("proposed_fields", Value::Null))),
        _ => Ok(Turn::await_in(PendingIntent::PrefillConfirmation)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("prefill_confirm_prompt", lang), options))),
    }
}

/// What to do after a confirmed prefill.
pub async fn action(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = vec![
        MenuOption::new(t("opt_plan_trial", lang), "trial_lesson"),
        MenuOption::new(t("opt_main_menu", lang), "back"),
        MenuOption::new(t("opt_handoff", lang), "handoff"),
    ];

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::PrefillAction)
                .reply(Reply::menu(t("prefill_action_prompt", lang), options)));
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("trial_lesson") => Ok(menus::start_lesson_flow(view, LessonType::Trial)),
        Some("back") => Ok(Turn::chain_to(PendingIntent::MenuSelection)),
        Some("handoff") => Ok(Turn::chain_to(PendingIntent::HandoffMenu)),
        _ => Ok(Turn::await_in(PendingIntent::PrefillAction)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("prefill_action_prompt", lang), options))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::IntakeAnalysis;
    use crate::flows::Control;
    use crate::flows::testutil::*;
    use serde_json::{Map, json};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn sufficient() -> IntakeAnalysis {
        IntakeAnalysis {
            for_who: Some("child".into()),
            learner_name: Some("Maria".into()),
            school_level: Some("havo".into()),
            topic_primary: Some("math".into()),
            preferred_times: Some("woensdagmiddag".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sufficient_analysis_merges_and_asks_confirmation() {
        let h = harness();
        *h.analyzer.intake.lock().unwrap() = Some(sufficient());
        let view = view_with(Map::new(), Map::new());
        let turn = run(
            &h.orchestrator.ctx,
            &view,
            "Mijn dochter Maria zit in Havo 5, wiskunde, woensdagmiddag",
        )
        .await
        .unwrap();

        assert_eq!(turn.next, PendingIntent::PrefillConfirmation);
        assert_eq!(turn.contact_patch.0.get("learner_name"), Some(&json!("Maria")));
        assert_eq!(turn.conv_patch.0.get("has_been_prefilled"), Some(&json!(true)));
        // Exactly confirm-all and correct-all, nothing else.
        let menu = turn.replies.iter().find(|r| !r.options.is_empty()).unwrap();
        let values: Vec<&str> = menu.options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["confirm_all", "correct_all"]);
    }

    #[tokio::test]
    async fn insufficient_analysis_yields_nothing() {
        let h = harness();
        *h.analyzer.intake.lock().unwrap() = Some(IntakeAnalysis {
            learner_name: Some("Maria".into()),
            ..Default::default()
        });
        let view = view_with(Map::new(), Map::new());
        assert!(run(&h.orchestrator.ctx, &view, "lang genoeg bericht hier").await.is_none());
    }

    #[tokio::test]
    async fn confirm_moves_to_action_menu() {
        let h = harness();
        let view = view_with(
            map(json!({
                "pending_intent": "prefill_confirmation",
                "proposed_fields": {"learner_name": "Maria"},
            })),
            Map::new(),
        );
        let turn = confirmation(&h.orchestrator.ctx, &view, &TurnInput::Message("klopt".into()))
            .await
            .unwrap();
        assert_eq!(turn.next, PendingIntent::PrefillAction);
        assert_eq!(turn.control, Control::Continue);
        assert_eq!(
            turn.contact_patch.0.get("has_completed_intake"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn reject_restarts_intake() {
        let h = harness();
        let view = view_with(
            map(json!({"pending_intent": "prefill_confirmation"})),
            Map::new(),
        );
        let turn = confirmation(
            &h.orchestrator.ctx,
            &view,
            &TurnInput::Message("aanpassen".into()),
        )
        .await
        .unwrap();
        assert_eq!(turn.next, PendingIntent::IntakeChoice);
    }

    #[tokio::test]
    async fn action_plan_trial_heads_to_planning() {
        let h = harness();
        let view = view_with(
            map(json!({"pending_intent": "prefill_action"})),
            map(json!({"has_completed_intake": true})),
        );
        let turn = action(&h.orchestrator.ctx, &view, &TurnInput::Message("proefles".into()))
            .await
            .unwrap();
        assert_eq!(turn.next, PendingIntent::Planning);
        assert_eq!(turn.conv_patch.0.get("lesson_type"), Some(&json!("trial")));
    }
}
