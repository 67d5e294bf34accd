//! Language detection and the user-facing string catalog.
//!
//! The practice serves Dutch students first; Dutch is the default and
//! English is detected by keyword counting. Every user-visible string goes
//! through [`t`] so no raw error text ever reaches the customer.

use serde::{Deserialize, Serialize};

/// Supported reply languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    Nl,
    En,
}

impl Default for Lang {
    fn default() -> Self {
        Self::Nl
    }
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nl => "nl",
            Self::En => "en",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "en" | "english" => Self::En,
            _ => Self::Nl,
        }
    }
}

const DUTCH_HINTS: &[&str] = &[
    "ik", "jij", "niet", "wel", "graag", "bijles", "mijn", "zoon", "dochter", "hoi", "hallo",
    "bedankt", "alstublieft", "wiskunde", "huiswerk", "les", "wanneer", "kan", "wil", "een",
    "het", "voor", "maandag", "dinsdag", "woensdag", "donderdag", "vrijdag", "zaterdag", "zondag",
];

const ENGLISH_HINTS: &[&str] = &[
    "i", "you", "not", "please", "tutoring", "my", "son", "daughter", "hi", "hello", "thanks",
    "math", "homework", "lesson", "when", "can", "want", "the", "for", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday", "would", "like",
];

/// Detect the message language by counting hint words. Ties and empty input
/// fall back to Dutch.
pub fn detect_language(text: &str) -> Lang {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let nl = words.iter().filter(|w| DUTCH_HINTS.contains(w)).count();
    let en = words.iter().filter(|w| ENGLISH_HINTS.contains(w)).count();

    if en > nl { Lang::En } else { Lang::Nl }
}

/// Look up a catalog string. Unknown keys fall back to the key itself so a
/// missing translation shows up in conversation transcripts instead of
/// crashing a flow.
pub fn t(key: &str, lang: Lang) -> String {
    let found = match lang {
        Lang::Nl => nl(key),
        Lang::En => en(key).or_else(|| nl(key)),
    };
    match found {
        Some(s) => s.to_string(),
        None => {
            tracing::warn!(key, "missing catalog string");
            key.to_string()
        }
    }
}

fn nl(key: &str) -> Option<&'static str> {
    Some(match key {
        "intro" => {
            "Hoi! Ik ben de planningsassistent van de bijlespraktijk. \
             Ik help je met het inplannen van een (proef)les. Kies hieronder wat je wilt doen."
        }
        "error_generic" => {
            "Sorry, er ging iets mis aan onze kant. Probeer het zo nog eens of kies 'Medewerker'."
        }

        // ── Main menus ──
        "menu_prompt_new" => "Welkom! Waar kan ik je mee helpen?",
        "menu_prompt_existing" => "Fijn dat je er weer bent! Wat wil je doen?",
        "menu_prompt_returning" => {
            "We hebben binnenkort weer plek. Wil je een les plannen met je bekende voorkeuren?"
        }
        "menu_prompt_weekend" => "Welkom bij de weekendlessen! Wat wil je doen?",
        "opt_trial_lesson" => "Proefles plannen",
        "opt_plan_lesson" => "Les plannen",
        "opt_info" => "Informatie",
        "opt_handoff" => "Medewerker",
        "opt_same_preferences" => "Zelfde voorkeuren",
        "opt_new_preferences" => "Voorkeuren aanpassen",
        "opt_back" => "Terug",

        // ── Info menu ──
        "info_prompt" => "Waarover wil je meer weten?",
        "opt_work_method" => "Werkwijze",
        "opt_tariffs" => "Tarieven",
        "opt_services" => "Aanbod",
        "info_work_method" => {
            "We werken één-op-één, online of op locatie. Elke les bestaat uit uitleg, \
             samen oefenen en zelfstandig toepassen, afgestemd op het niveau van de leerling."
        }
        "info_tariffs" => {
            "Een losse les (60 min) kost €45. Een proefles van 30 minuten is gratis. \
             Strippenkaarten en weekendtarieven sturen we je graag op maat toe."
        }
        "info_services" => {
            "We bieden bijles voor basisschool t/m universiteit: wiskunde, statistiek, \
             natuurkunde, scheikunde, Engels en programmeren."
        }
        "tariffs_follow_up" => "Wil je meteen een proefles plannen?",

        // ── Intake ──
        "intake_for_who" => "Voor wie is de bijles?",
        "opt_self" => "Voor mezelf",
        "opt_child" => "Voor mijn kind",
        "opt_other" => "Iemand anders",
        "intake_learner_name" => "Wat is de naam van de leerling?",
        "intake_school_level" => "Op welk niveau zit de leerling?",
        "opt_po" => "Basisschool",
        "opt_vmbo" => "Vmbo",
        "opt_havo" => "Havo",
        "opt_vwo" => "Vwo",
        "opt_mbo" => "Mbo",
        "opt_hbo" => "Hbo",
        "opt_wo" => "Universiteit (wo)",
        "opt_adult" => "Volwassene",
        "intake_topic" => "Met welk vak kunnen we helpen?",
        "opt_math" => "Wiskunde",
        "opt_stats" => "Statistiek",
        "opt_science" => "Natuurkunde",
        "opt_chemistry" => "Scheikunde",
        "opt_english" => "Engels",
        "opt_programming" => "Programmeren",
        "opt_other_topic" => "Iets anders",
        "intake_goals" => "Waar wil je aan werken? Beschrijf kort het doel van de lessen.",
        "intake_preferred_times" => {
            "Welke dagen of dagdelen komen het beste uit? Bijvoorbeeld: woensdagmiddag."
        }
        "intake_lesson_mode" => "Heb je voorkeur voor online of fysieke les?",
        "opt_online" => "Online",
        "opt_in_person" => "Op locatie",
        "intake_guardian_name" => {
            "Omdat de leerling minderjarig is, hebben we de naam van een ouder/verzorger nodig."
        }
        "intake_guardian_phone" => "En het telefoonnummer van deze ouder/verzorger?",
        "intake_summary_header" => "Even samenvatten wat ik heb genoteerd:",
        "intake_invalid" => "Dat antwoord herken ik niet. Kies een van de opties hieronder.",
        "intake_choice_prompt" => {
            "Wil je de vragen één voor één beantwoorden, of alles in één bericht vertellen?"
        }
        "opt_step_by_step" => "Stap voor stap",
        "opt_free_text" => "In één bericht",
        "intake_free_text_prompt" => {
            "Vertel in één bericht voor wie de les is, het niveau, het vak en je voorkeursdagen."
        }
        "intake_free_text_retry" => {
            "Ik kon er nog niet alles uithalen. Kun je het nog eens omschrijven?"
        }
        "opt_confirm_all" => "Klopt helemaal",
        "opt_correct_all" => "Aanpassen",
        "intake_committed" => "Top, je gegevens zijn opgeslagen!",

        // ── Prefill ──
        "prefill_summary_header" => "Dank je! Dit heb ik uit je bericht gehaald:",
        "prefill_confirm_prompt" => "Klopt dit?",
        "prefill_action_prompt" => "Wat wil je nu doen?",
        "opt_plan_trial" => "Proefles plannen",
        "opt_main_menu" => "Naar het menu",

        // ── Planning ──
        "planning_prompt" => "Dit zijn de eerstvolgende mogelijkheden. Welke past het beste?",
        "planning_prompt_more" => "Hier zijn nog een paar mogelijkheden. Welke past het beste?",
        "opt_more_options" => "Meer opties",
        "planning_none" => {
            "Ik zie nu geen passende tijden. Een medewerker kijkt met je mee naar een moment."
        }
        "planning_invalid" => "Die tijd stond er niet tussen. Kies een van de opties hieronder.",
        "planning_booked" => "Gelukt! Je les staat ingepland. Je ontvangt een bevestiging.",
        "planning_guardian_first" => {
            "Voordat we een les inplannen hebben we nog de gegevens van een ouder/verzorger nodig."
        }

        // ── Handoff ──
        "handoff_confirm" => "Zal ik je doorverbinden met een medewerker?",
        "opt_yes" => "Ja, graag",
        "opt_cancel" => "Nee, toch niet",
        "handoff_message" => {
            "Ik verbind je door met een medewerker. Je hoort zo snel mogelijk van ons!"
        }
        "handoff_cancelled" => "Prima! Je kunt altijd opnieuw kiezen in het menu.",

        // ── Email ──
        "email_request" => "Op welk e-mailadres mogen we de bevestiging sturen?",
        "email_invalid" => "Dat lijkt geen geldig e-mailadres. Probeer het nog eens.",
        "email_thanks" => "Dank je! De bevestiging komt eraan.",

        // ── Payment ──
        "payment_link" => "Bijna klaar! Rond de betaling af via deze link:",
        "payment_confirmed" => "Je betaling is ontvangen en je les is definitief bevestigd!",

        // ── Wipe ──
        "wipe_confirm" => "Weet je zeker dat je alle opgeslagen gegevens wilt wissen?",
        "wipe_done" => "Alle opgeslagen gegevens zijn gewist.",
        "wipe_cancelled" => "Oké, er is niets gewist.",

        _ => return None,
    })
}

fn en(key: &str) -> Option<&'static str> {
    Some(match key {
        "intro" => {
            "Hi! I'm the tutoring practice's planning assistant. \
             I can help you schedule a (trial) lesson. Pick an option below."
        }
        "error_generic" => {
            "Sorry, something went wrong on our side. Please try again or pick 'Staff member'."
        }
        "menu_prompt_new" => "Welcome! How can I help you?",
        "menu_prompt_existing" => "Good to see you again! What would you like to do?",
        "menu_prompt_returning" => {
            "We have availability again. Want to book a lesson with your usual preferences?"
        }
        "menu_prompt_weekend" => "Welcome to weekend lessons! What would you like to do?",
        "opt_trial_lesson" => "Book a trial lesson",
        "opt_plan_lesson" => "Book a lesson",
        "opt_info" => "Information",
        "opt_handoff" => "Staff member",
        "opt_same_preferences" => "Same preferences",
        "opt_new_preferences" => "Update preferences",
        "opt_back" => "Back",
        "info_prompt" => "What would you like to know more about?",
        "opt_work_method" => "How we work",
        "opt_tariffs" => "Rates",
        "opt_services" => "Subjects",
        "info_work_method" => {
            "We teach one-on-one, online or in person. Every lesson combines explanation, \
             guided practice and independent work, tailored to the student's level."
        }
        "info_tariffs" => {
            "A single lesson (60 min) is €45. A 30-minute trial lesson is free. \
             We're happy to send tailored packages and weekend rates."
        }
        "info_services" => {
            "We tutor from primary school through university: maths, statistics, physics, \
             chemistry, English and programming."
        }
        "tariffs_follow_up" => "Would you like to book a trial lesson right away?",
        "intake_for_who" => "Who are the lessons for?",
        "opt_self" => "For myself",
        "opt_child" => "For my child",
        "opt_other" => "Someone else",
        "intake_learner_name" => "What is the student's name?",
        "intake_school_level" => "What level is the student at?",
        "opt_po" => "Primary school",
        "opt_vmbo" => "Vmbo",
        "opt_havo" => "Havo",
        "opt_vwo" => "Vwo",
        "opt_mbo" => "Mbo",
        "opt_hbo" => "Hbo",
        "opt_wo" => "University",
        "opt_adult" => "Adult",
        "intake_topic" => "Which subject can we help with?",
        "opt_math" => "Maths",
        "opt_stats" => "Statistics",
        "opt_science" => "Physics",
        "opt_chemistry" => "Chemistry",
        "opt_english" => "English",
        "opt_programming" => "Programming",
        "opt_other_topic" => "Something else",
        "intake_goals" => "What would you like to work on? Briefly describe the goal.",
        "intake_preferred_times" => {
            "Which days or dayparts suit you best? For example: Wednesday afternoon."
        }
        "intake_lesson_mode" => "Do you prefer online or in-person lessons?",
        "opt_online" => "Online",
        "opt_in_person" => "In person",
        "intake_guardian_name" => {
            "Because the student is a minor, we need the name of a parent/guardian."
        }
        "intake_guardian_phone" => "And the phone number of this parent/guardian?",
        "intake_summary_header" => "Let me summarise what I noted:",
        "intake_invalid" => "I didn't recognise that answer. Please pick one of the options below.",
        "intake_choice_prompt" => {
            "Would you like to answer the questions one by one, or tell everything in one message?"
        }
        "opt_step_by_step" => "Step by step",
        "opt_free_text" => "In one message",
        "intake_free_text_prompt" => {
            "Tell me in one message who the lesson is for, the level, the subject and your \
             preferred days."
        }
        "intake_free_text_retry" => "I couldn't extract everything yet. Could you rephrase?",
        "opt_confirm_all" => "All correct",
        "opt_correct_all" => "Change something",
        "intake_committed" => "Great, your details are saved!",
        "prefill_summary_header" => "Thanks! This is what I got from your message:",
        "prefill_confirm_prompt" => "Is this correct?",
        "prefill_action_prompt" => "What would you like to do next?",
        "opt_plan_trial" => "Book a trial lesson",
        "opt_main_menu" => "To the menu",
        "planning_prompt" => "These are the next available times. Which suits you best?",
        "planning_prompt_more" => "Here are a few more available times. Which suits you best?",
        "opt_more_options" => "More options",
        "planning_none" => {
            "I don't see suitable times right now. A staff member will help you find one."
        }
        "planning_invalid" => "That time wasn't in the list. Please pick one of the options below.",
        "planning_booked" => "Done! Your lesson is scheduled. You'll receive a confirmation.",
        "planning_guardian_first" => {
            "Before we schedule a lesson we still need a parent/guardian's details."
        }
        "handoff_confirm" => "Shall I connect you to a staff member?",
        "opt_yes" => "Yes, please",
        "opt_cancel" => "No, thanks",
        "handoff_message" => "I'm connecting you to a staff member. We'll be with you shortly!",
        "handoff_cancelled" => "No problem! You can always pick again from the menu.",
        "email_request" => "Which email address may we send the confirmation to?",
        "email_invalid" => "That doesn't look like a valid email address. Please try again.",
        "email_thanks" => "Thank you! The confirmation is on its way.",
        "payment_link" => "Almost there! Complete your payment via this link:",
        "payment_confirmed" => "Your payment was received and your lesson is confirmed!",
        "wipe_confirm" => "Are you sure you want to erase all stored details?",
        "wipe_done" => "All stored details have been erased.",
        "wipe_cancelled" => "Okay, nothing was erased.",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dutch_is_the_default() {
        assert_eq!(detect_language(""), Lang::Nl);
        assert_eq!(detect_language("xyz 123"), Lang::Nl);
    }

    #[test]
    fn detects_dutch() {
        assert_eq!(
            detect_language("Hoi, ik zoek bijles wiskunde voor mijn dochter"),
            Lang::Nl
        );
    }

    #[test]
    fn detects_english() {
        assert_eq!(
            detect_language("Hello, I would like tutoring for my son please"),
            Lang::En
        );
    }

    #[test]
    fn unknown_key_falls_back_to_key() {
        assert_eq!(t("no_such_key", Lang::Nl), "no_such_key");
    }

    #[test]
    fn english_falls_back_to_dutch_then_key() {
        // Every Dutch key resolves for English too.
        assert!(!t("intro", Lang::En).is_empty());
    }

    #[test]
    fn lang_parse_roundtrip() {
        assert_eq!(Lang::parse("en"), Lang::En);
        assert_eq!(Lang::parse("EN"), Lang::En);
        assert_eq!(Lang::parse("nl"), Lang::Nl);
        assert_eq!(Lang::parse("unknown"), Lang::Nl);
    }
}
