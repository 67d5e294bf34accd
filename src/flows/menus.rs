//! Menu-driven flows: main menu, info, handoff, email capture and the
//! administrative wipe.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::flows::{Ctx, Turn, TurnInput, View};
use crate::guard::Reply;
use crate::i18n::{Lang, t};
use crate::menu::{self, MenuOption};
use crate::segment::Segment;
use crate::state::{AttrPatch, CONTACT_KEYS, LessonType, PendingIntent};
use serde_json::Value;

fn opt(label_key: &str, value: &str, lang: Lang) -> MenuOption {
    MenuOption::new(t(label_key, lang), value)
}

/// The segment-specific main menu options.
pub(crate) fn main_menu_options(segment: Segment, lang: Lang) -> Vec<MenuOption> {
    let mut options = match segment {
        Segment::New => vec![opt("opt_trial_lesson", "trial_lesson", lang)],
        Segment::Existing => vec![opt("opt_plan_lesson", "plan_lesson", lang)],
        Segment::ReturningBroadcast => vec![
            opt("opt_same_preferences", "same_preferences", lang),
            opt("opt_new_preferences", "new_preferences", lang),
        ],
        Segment::Weekend => vec![
            opt("opt_trial_lesson", "trial_lesson", lang),
            opt("opt_plan_lesson", "plan_lesson", lang),
        ],
    };
    options.push(opt("opt_info", "info", lang));
    options.push(opt("opt_handoff", "handoff", lang));
    options
}

pub(crate) fn main_menu_prompt(segment: Segment, lang: Lang) -> String {
    let key = match segment {
        Segment::New => "menu_prompt_new",
        Segment::Existing => "menu_prompt_existing",
        Segment::ReturningBroadcast => "menu_prompt_returning",
        Segment::Weekend => "menu_prompt_weekend",
    };
    t(key, lang)
}

/// After a lesson-type choice: customers with a completed intake go straight
/// to planning, everyone else through intake first.
pub(crate) fn start_lesson_flow(view: &View, lesson_type: LessonType) -> Turn {
    let next = if view.contact.has_completed_intake {
        PendingIntent::Planning
    } else {
        PendingIntent::IntakeChoice
    };
    Turn::chain_to(next).conv(
        AttrPatch::new()
            .set_str("lesson_type", lesson_type.to_string())
            .set("slot_page", Value::from(0)),
    )
}

/// Main menu: greets idle conversations and dispatches selections.
pub async fn main(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let lang = view.lang;
    let options = main_menu_options(view.segment, lang);
    let prompt = main_menu_prompt(view.segment, lang);

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::MenuSelection)
                .reply(Reply::menu(prompt, options)));
        }
        TurnInput::Message(text) => text,
    };

    if view.conv.pending_intent == PendingIntent::Idle {
        // First customer message of a fresh conversation.
        let mut turn = Turn::await_in(PendingIntent::MenuSelection)
            .reply(Reply::text(t("intro", lang)))
            .reply(Reply::menu(prompt, options));
        turn.conv_patch = turn.conv_patch.set_bool("has_been_prefilled", true);
        return Ok(turn);
    }

    match menu::resolve(text, &options).as_deref() {
        Some("trial_lesson") => Ok(start_lesson_flow(view, LessonType::Trial)),
        Some("plan_lesson") | Some("same_preferences") => {
            Ok(start_lesson_flow(view, LessonType::Regular))
        }
        Some("new_preferences") => Ok(Turn::chain_to(PendingIntent::IntakeChoice).conv(
            AttrPatch::new().set_str("lesson_type", LessonType::Regular.to_string()),
        )),
        Some("info") => Ok(Turn::chain_to(PendingIntent::InfoMenu)),
        Some("handoff") => Ok(Turn::chain_to(PendingIntent::HandoffMenu)),
        _ => {
            let _ = ctx; // collaborators unused in this handler
            Ok(Turn::await_in(PendingIntent::MenuSelection)
                .reply(Reply::text(t("intake_invalid", lang)))
                .reply(Reply::menu(prompt, options)))
        }
    }
}

fn info_options(lang: Lang) -> Vec<MenuOption> {
    vec![
        opt("opt_work_method", "work_method", lang),
        opt("opt_tariffs", "tariffs", lang),
        opt("opt_services", "services", lang),
        opt("opt_back", "back", lang),
    ]
}

/// Info menu. After an answer the same menu is re-offered (as the follow-up
/// intent) so the customer can keep browsing or go back.
pub async fn info(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = info_options(lang);

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::InfoMenu)
                .reply(Reply::menu(t("info_prompt", lang), options)));
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some(choice @ ("work_method" | "services")) => {
            let key = if choice == "work_method" {
                "info_work_method"
            } else {
                "info_services"
            };
            Ok(Turn::await_in(PendingIntent::InfoMenuFollowUp)
                .reply(Reply::text(t(key, lang)))
                .reply(Reply::menu(t("info_prompt", lang), options.clone())))
        }
        Some("tariffs") => Ok(Turn::await_in(PendingIntent::TariffsFollowUp)
            .reply(Reply::text(t("info_tariffs", lang)))
            .reply(Reply::menu(
                t("tariffs_follow_up", lang),
                tariffs_options(lang),
            ))),
        Some("back") => Ok(Turn::chain_to(PendingIntent::MenuSelection)),
        _ => Ok(Turn::await_in(PendingIntent::InfoMenu)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("info_prompt", lang), options))),
    }
}

fn tariffs_options(lang: Lang) -> Vec<MenuOption> {
    vec![
        opt("opt_plan_trial", "trial_lesson", lang),
        opt("opt_handoff", "handoff", lang),
        opt("opt_back", "back", lang),
    ]
}

/// "Book a trial right away?" follow-up under the tariffs answer.
pub async fn tariffs_follow_up(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = tariffs_options(lang);

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::TariffsFollowUp)
                .reply(Reply::menu(t("tariffs_follow_up", lang), options)));
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("trial_lesson") => Ok(start_lesson_flow(view, LessonType::Trial)),
        Some("handoff") => Ok(Turn::chain_to(PendingIntent::HandoffMenu)),
        Some("back") => Ok(Turn::chain_to(PendingIntent::MenuSelection)),
        _ => Ok(Turn::await_in(PendingIntent::TariffsFollowUp)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("tariffs_follow_up", lang), options))),
    }
}

/// Explicit handoff confirmation before pulling a human in.
pub async fn handoff_menu(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = vec![opt("opt_yes", "yes", lang), opt("opt_cancel", "cancel", lang)];

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::HandoffMenu)
                .reply(Reply::menu(t("handoff_confirm", lang), options)));
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("yes") => Ok(Turn::await_in(PendingIntent::Handoff)
            .reply(Reply::text(t("handoff_message", lang)))
            .label(crate::guard::HANDOFF_LABEL)
            .assign_handoff()),
        Some("cancel") => Ok(Turn::chain_to(PendingIntent::MenuSelection)
            .reply(Reply::text(t("handoff_cancelled", lang)))),
        _ => Ok(Turn::await_in(PendingIntent::HandoffMenu)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("handoff_confirm", lang), options))),
    }
}

/// While a human owns the thread the bot says nothing at all.
pub async fn handoff_silent(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = (ctx, view, input);
    Ok(Turn::await_in(PendingIntent::Handoff))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]{2,}$").unwrap())
}

/// Confirmation-address capture after a booking.
pub async fn email(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::EmailRequest)
                .reply(Reply::text(t("email_request", lang))));
        }
        TurnInput::Message(text) => text,
    };

    let candidate = text.trim();
    if email_re().is_match(candidate) {
        Ok(Turn::await_in(PendingIntent::Idle)
            .reply(Reply::text(t("email_thanks", lang)))
            .contact(AttrPatch::new().set_str("email", candidate)))
    } else {
        Ok(Turn::await_in(PendingIntent::EmailRequest)
            .reply(Reply::text(t("email_invalid", lang))))
    }
}

/// Administrative reset: confirm, then null out every bot-owned contact
/// attribute and the per-conversation flow state.
pub async fn wipe(ctx: &Ctx, view: &View, input: &TurnInput) -> Result<Turn> {
    let _ = ctx;
    let lang = view.lang;
    let options = vec![opt("opt_yes", "yes", lang), opt("opt_cancel", "cancel", lang)];

    let text = match input {
        TurnInput::Enter => {
            return Ok(Turn::await_in(PendingIntent::WipeConfirmation)
                .reply(Reply::menu(t("wipe_confirm", lang), options)));
        }
        TurnInput::Message(text) => text,
    };

    match menu::resolve(text, &options).as_deref() {
        Some("yes") => {
            let mut contact = AttrPatch::new();
            for key in CONTACT_KEYS {
                contact = contact.set(key, Value::Null);
            }
            let conv = AttrPatch::new()
                .set("intake_step", Value::Null)
                .set("lesson_type", Value::Null)
                .set("proposed_fields", Value::Null)
                .set("suggested_slots", Value::Null)
                .set("order_id", Value::Null)
                .set("slot_page", Value::from(0))
                .set("confirm_retries", Value::from(0))
                .set_bool("has_been_prefilled", false);
            Ok(Turn::await_in(PendingIntent::Idle)
                .reply(Reply::text(t("wipe_done", lang)))
                .contact(contact)
                .conv(conv))
        }
        Some("cancel") => Ok(Turn::await_in(PendingIntent::Idle)
            .reply(Reply::text(t("wipe_cancelled", lang)))),
        _ => Ok(Turn::await_in(PendingIntent::WipeConfirmation)
            .reply(Reply::text(t("intake_invalid", lang)))
            .reply(Reply::menu(t("wipe_confirm", lang), options))),
    }
}
