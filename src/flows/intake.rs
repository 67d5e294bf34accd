//! Intake flows: the scripted wizard and the one-message free-text path.
//!
//! Both paths stage their answers in the conversation's `proposed_fields`
//! map and commit to the contact only after an explicit confirmation. A
//! customer who keeps rejecting the summary is handed to a human instead of
//! being looped through the wizard forever.

use serde_json::{Map, Value};

use crate::analysis::IntakeAnalysis;
use crate::error::Result;
use crate::flows::{Ctx, Turn, TurnInput, View};
use crate::guard::Reply;
use crate::i18n::{Lang, t};
use crate::menu::{self, MenuOption};
use crate::state::{AttrPatch, ContactProfile, IntakeStep, PendingIntent};

/// Summary rejections tolerated before a forced handoff.
pub const MAX_CONFIRM_RETRIES: i64 = 2;

fn opt(label_key: &str, value: &str, lang: Lang) -> MenuOption {
    MenuOption::new(t(label_key, lang), value)
}

pub(crate) fn confirm_options(lang: Lang) -> Vec<MenuOption> {
    vec![
        opt("opt_confirm_all", "confirm_all", lang),
        opt("opt_correct_all", "correct_all", lang),
    ]
}

/// Contact profile as it would look with the staged answers applied. Drives
/// the guardian gate while the wizard is still in flight.
pub(crate) fn merged_profile(view: &View) -> ContactProfile {
    let mut raw = view.contact_raw.clone();
    for (k, v) in &view.conv.proposed {
        raw.insert(k.clone(), v.clone());
    }
    ContactProfile::from_map(&raw)
}

/// Summary of the staged answers plus the confirm/correct menu.
pub(crate) fn summary_reply(
    proposed: &Map<String, Value>,
    header_key: &str,
    lang: Lang,
) -> Vec<Reply> {
    let lines = IntakeAnalysis::from_value(&Value::Object(proposed.clone()))
        .map(|a| a.summary_lines(lang))
        .unwrap_or_default();
    let body = format!("{}\n{}", t(header_key, lang), lines.join("\n"));
    vec![
        Reply::text(body),
        Reply::menu(t("prefill_confirm_prompt", lang), confirm_options(lang)),
    ]
}

/// Escalation after too many rejected summaries.
pub(crate) fn forced_handoff(lang: Lang) -> Turn {
    Turn::await_in(PendingIntent::Handoff)
        .reply(Reply::text(t("handoff_message", lang)))
        .label(crate::guard::HANDOFF_LABEL)
        .assign_handoff()
}

/// Commit the staged answers to the durable contact record and move on to
/// planning. Applied labels let the team filter conversations by audience
/// and subject.
pub(crate) fn commit(view: &View) -> Turn {
    let lang = view.lang;
    let proposed = &view.conv.proposed;

    let mut contact = AttrPatch::new().set_bool("has_completed_intake", true);
    for (k, v) in proposed {
        contact = contact.set(k, v.clone());
    }

    let mut turn = Turn::chain_to(PendingIntent::Planning)
        .reply(Reply::text(t("intake_committed", lang)))
        .contact(contact)
        .conv(
            AttrPatch::new()
                .set("proposed_fields", Value::Null)
                .set("intake_step", Value::Null)
                .set("confirm_retries", Value::from(0)),
        );
    if let Some(Value::String(for_who)) = proposed.get("for_who") {
        turn = turn.label(format!("audience:{for_who}"));
    }
    if let Some(Value::String(topic)) = proposed.get("topic_primary") {
        turn = turn.label(format!("subject:{topic}"));
    }
    turn
}

// ── Path choice ─────────────────────────────────────────────────────

/// "Step by step, or everything in one message?"
pub async fn choice(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let lang = view.lang;
    let mut options = vec![opt("opt_step_by_step", "step_by_step", lang)];
    // The one-message path needs the analyzer.
    if ctx.analysis_enabled {
        options.push(opt("opt_free_text", "free_text", lang));
    }

    let text = match input {
        TurnInput::Enter => {
            if options.len() == 1 {
                // Nothing to choose; straight into the wizard.
                return Ok(Turn::chain_to(PendingIntent::Intake).step(IntakeStep::ForWho));
            }
            return Ok(Turn::await_in(PendingIntent::IntakeChoice)
                .reply(Reply::menu(t("intake_choice_prompt", lang), options)));
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("step_by_step") => {
            Ok(Turn::chain_to(PendingIntent::Intake).step(IntakeStep::ForWho))
        }
        Some("free_text") => Ok(Turn::chain_to(PendingIntent::IntakeFreeText)),
        _ => Ok(Turn::await_in(PendingIntent::IntakeChoice)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("intake_choice_prompt", lang), options))),
    }
}

// ── Scripted wizard ─────────────────────────────────────────────────

fn step_options(step: IntakeStep, lang: Lang) -> Vec<MenuOption> {
    match step {
        IntakeStep::ForWho => vec![
            opt("opt_self", "self", lang),
            opt("opt_child", "child", lang),
            opt("opt_other", "other", lang),
        ],
        IntakeStep::SchoolLevel => vec![
            opt("opt_po", "po", lang),
            opt("opt_vmbo", "vmbo", lang),
            opt("opt_havo", "havo", lang),
            opt("opt_vwo", "vwo", lang),
            opt("opt_mbo", "mbo", lang),
            opt("opt_hbo", "university_hbo", lang),
            opt("opt_wo", "university_wo", lang),
            opt("opt_adult", "adult", lang),
        ],
        IntakeStep::Topic => vec![
            opt("opt_math", "math", lang),
            opt("opt_stats", "stats", lang),
            opt("opt_science", "science", lang),
            opt("opt_chemistry", "chemistry", lang),
            opt("opt_english", "english", lang),
            opt("opt_programming", "programming", lang),
            opt("opt_other_topic", "other", lang),
        ],
        IntakeStep::LessonMode => vec![
            opt("opt_online", "online", lang),
            opt("opt_in_person", "in_person", lang),
        ],
        _ => Vec::new(),
    }
}

fn step_prompt_key(step: IntakeStep) -> &'static str {
    match step {
        IntakeStep::ForWho => "intake_for_who",
        IntakeStep::LearnerName => "intake_learner_name",
        IntakeStep::SchoolLevel => "intake_school_level",
        IntakeStep::Topic => "intake_topic",
        IntakeStep::Goals => "intake_goals",
        IntakeStep::PreferredTimes => "intake_preferred_times",
        IntakeStep::LessonMode => "intake_lesson_mode",
        IntakeStep::GuardianName => "intake_guardian_name",
        IntakeStep::GuardianPhone => "intake_guardian_phone",
        IntakeStep::Summary => "intake_summary_header",
    }
}

/// The attribute key a wizard step writes into the staged proposal.
fn step_field(step: IntakeStep) -> Option<&'static str> {
    Some(match step {
        IntakeStep::ForWho => "for_who",
        IntakeStep::LearnerName => "learner_name",
        IntakeStep::SchoolLevel => "school_level",
        IntakeStep::Topic => "topic_primary",
        IntakeStep::Goals => "goals",
        IntakeStep::PreferredTimes => "preferred_times",
        IntakeStep::LessonMode => "lesson_mode",
        IntakeStep::GuardianName => "guardian_name",
        IntakeStep::GuardianPhone => "guardian_phone",
        IntakeStep::Summary => return None,
    })
}

fn looks_like_phone(text: &str) -> bool {
    text.chars().filter(|c| c.is_ascii_digit()).count() >= 8
}

fn prompt_for(step: IntakeStep, lang: Lang) -> Reply {
    let options = step_options(step, lang);
    if options.is_empty() {
        Reply::text(t(step_prompt_key(step), lang))
    } else {
        Reply::menu(t(step_prompt_key(step), lang), options)
    }
}

/// One question per turn, staged into `proposed_fields`, with a summary
/// confirmation at the end.
pub async fn scripted(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let step = view.conv.intake_step.unwrap_or(IntakeStep::ForWho);

    let text = match input {
        TurnInput::Enter => {
            if step == IntakeStep::Summary {
                let mut turn = Turn::await_in(PendingIntent::Intake);
                for reply in summary_reply(&view.conv.proposed, "intake_summary_header", lang) {
                    turn = turn.reply(reply);
                }
                return Ok(turn.step(IntakeStep::Summary));
            }
            return Ok(Turn::await_in(PendingIntent::Intake)
                .reply(prompt_for(step, lang))
                .step(step));
        }
        TurnInput::Message(text) => text.trim(),
    };

    if step == IntakeStep::Summary {
        let options = confirm_options(lang);
        return match menu::resolve(text, &options).as_deref() {
            Some("confirm_all") => Ok(commit(view)),
            Some("correct_all") => {
                let retries = view.conv.confirm_retries + 1;
                if retries > MAX_CONFIRM_RETRIES {
                    return Ok(forced_handoff(lang));
                }
                Ok(Turn::chain_to(PendingIntent::Intake)
                    .step(IntakeStep::ForWho)
                    .conv(
                        AttrPatch::new()
                            .set("confirm_retries", Value::from(retries))
                            .set("proposed_fields", Value::Object(Map::new())),
                    ))
            }
            _ => Ok(Turn::await_in(PendingIntent::Intake)
                .reply(Reply::text(t("intake_invalid", lang)))
                .reply(
                    Reply::menu(t("prefill_confirm_prompt", lang), options),
                )),
        };
    }

    // Validate the answer for the current step.
    let options = step_options(step, lang);
    let answer = if options.is_empty() {
        let valid = match step {
            IntakeStep::GuardianPhone => looks_like_phone(text),
            _ => text.chars().count() >= 2,
        };
        if !valid {
            return Ok(Turn::await_in(PendingIntent::Intake)
                .reply(Reply::text(t("intake_invalid", lang)))
                .reply(prompt_for(step, lang)));
        }
        text.to_string()
    } else {
        match menu::resolve(text, &options) {
            Some(value) => value,
            None => {
                return Ok(Turn::await_in(PendingIntent::Intake)
                    .reply(Reply::text(t("intake_invalid", lang)))
                    .reply(prompt_for(step, lang)));
            }
        }
    };

    let mut proposed = view.conv.proposed.clone();
    if let Some(field) = step_field(step) {
        proposed.insert(field.to_string(), Value::String(answer.clone()));
    }
    if step == IntakeStep::SchoolLevel {
        proposed.insert("is_adult".to_string(), Value::Bool(answer == "adult"));
    }

    // Guardian steps appear only when the staged answers still describe a
    // minor registering for themselves.
    let mut merged_raw = view.contact_raw.clone();
    for (k, v) in &proposed {
        merged_raw.insert(k.clone(), v.clone());
    }
    let needs_guardian = ContactProfile::from_map(&merged_raw).needs_guardian();

    let next = step.next(needs_guardian).unwrap_or(IntakeStep::Summary);
    Ok(Turn::chain_to(PendingIntent::Intake)
        .step(next)
        .conv(AttrPatch::new().set("proposed_fields", Value::Object(proposed))))
}

// ── Free-text path ──────────────────────────────────────────────────

/// Everything in one message, extracted by the analyzer. Anything the
/// analyzer can't handle drops back to the scripted wizard.
pub async fn free_text(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let lang = view.lang;

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::IntakeFreeText)
                .reply(Reply::text(t("intake_free_text_prompt", lang))));
        }
        TurnInput::Message(text) => text,
    };

    let analysis = match ctx.analyzer.analyze_intake(text).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(conversation_id = view.conversation_id, error = %e, "intake analysis failed");
            None
        }
    };

    match analysis {
        Some(a) if a.is_sufficient() => {
            Ok(Turn::chain_to(PendingIntent::IntakeFreeTextConfirm).conv(
                AttrPatch::new().set("proposed_fields", Value::Object(a.to_patch().0)),
            ))
        }
        _ => Ok(Turn::chain_to(PendingIntent::Intake)
            .reply(Reply::text(t("intake_free_text_retry", lang)))
            .step(IntakeStep::ForWho)),
    }
}

/// Confirm or reject the extracted fields.
pub async fn free_text_confirm(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = confirm_options(lang);

    let text = match input {
        TurnInput::Enter => {
            let mut turn = Turn::await_in(PendingIntent::IntakeFreeTextConfirm);
            for reply in summary_reply(&view.conv.proposed, "intake_summary_header", lang) {
                turn = turn.reply(reply);
            }
            return Ok(turn);
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("confirm_all") => Ok(commit(view)),
        Some("correct_all") => {
            let retries = view.conv.confirm_retries + 1;
            if retries > MAX_CONFIRM_RETRIES {
                return Ok(forced_handoff(lang));
            }
            Ok(Turn::chain_to(PendingIntent::IntakeFreeText).conv(
                AttrPatch::new()
                    .set("confirm_retries", Value::from(retries))
                    .set("proposed_fields", Value::Object(Map::new())),
            ))
        }
        _ => Ok(Turn::await_in(PendingIntent::IntakeFreeTextConfirm)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("prefill_confirm_prompt", lang), options))),
    }
}
