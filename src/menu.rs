//! Single-choice menus: delivery limits and reply matching.
//!
//! The platform renders menus on WhatsApp, which caps option counts and
//! string lengths; violations must truncate, never fail a send. Replies come
//! back either as the structured option value or as free text ("2", "optie 2",
//! "tarieven", "💰 Tarieven") which is normalized into a canonical token
//! before dispatch.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum number of options a menu may carry.
pub const MAX_OPTIONS: usize = 10;
/// Maximum length of an option title.
pub const MAX_TITLE_LEN: usize = 24;
/// Maximum length of an option value.
pub const MAX_VALUE_LEN: usize = 200;
/// Maximum length of a menu body.
pub const MAX_BODY_LEN: usize = 1024;

/// One selectable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    pub title: String,
    pub value: String,
}

impl MenuOption {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
        }
    }
}

/// Truncate `text` to `max` characters, ellipsized when it doesn't fit.
fn ellipsize(text: &str, max: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return text.to_string();
    }
    let mut out: String = chars[..max.saturating_sub(3)].iter().collect();
    out.push_str("...");
    out
}

/// Clamp a menu body and options to the platform's delivery limits.
pub fn clamp(body: &str, options: &[MenuOption]) -> (String, Vec<MenuOption>) {
    let body = ellipsize(body, MAX_BODY_LEN);
    let options = options
        .iter()
        .take(MAX_OPTIONS)
        .map(|o| MenuOption {
            title: ellipsize(&o.title, MAX_TITLE_LEN),
            value: o.value.chars().take(MAX_VALUE_LEN).collect(),
        })
        .collect();
    (body, options)
}

/// Lowercase, strip emoji/punctuation/diacritic junk, collapse whitespace,
/// and treat underscores as spaces so `proef_les` and `proefles`-style values
/// compare equal to typed text.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_alphanumeric() {
            for l in c.to_lowercase() {
                out.push(l);
            }
        } else if c == '_' || c.is_whitespace() {
            out.push(' ');
        }
        // Everything else (emoji, punctuation, combining marks) drops out.
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:optie|keuze|option|choice)?\s*(\d{1,2})$").unwrap())
}

/// Map free text to a canonical menu token, independent of the option list.
pub fn synonym_token(normalized: &str) -> Option<&'static str> {
    let token = match normalized {
        "info" | "informatie" | "information" | "meer info" => "info",
        "medewerker" | "mens" | "human" | "staff" | "agent" | "iemand spreken" => "handoff",
        "proefles" | "proefles plannen" | "trial" | "trial lesson" | "gratis les" => "trial_lesson",
        "les plannen" | "les" | "plannen" | "boeken" | "book" | "plan lesson" | "lesson" => {
            "plan_lesson"
        }
        "werkwijze" | "hoe werkt het" | "how we work" | "work method" => "work_method",
        "tarieven" | "prijs" | "prijzen" | "kosten" | "rates" | "price" | "pricing" => "tariffs",
        "aanbod" | "vakken" | "diensten" | "subjects" | "services" => "services",
        "terug" | "back" | "menu" => "back",
        "zelfde voorkeuren" | "same preferences" | "zelfde" => "same_preferences",
        "voorkeuren aanpassen" | "andere voorkeuren" | "update preferences" => "new_preferences",
        "klopt" | "klopt helemaal" | "ja klopt" | "correct" | "all correct" => "confirm_all",
        "aanpassen" | "klopt niet" | "wijzigen" | "change" | "change something" => "correct_all",
        "meer opties" | "meer" | "andere tijden" | "more" | "more options" => "more_options",
        "ja" | "ja graag" | "yes" | "yes please" | "ok" | "oke" | "okay" => "yes",
        "nee" | "nee toch niet" | "no" | "no thanks" | "annuleer" | "cancel" => "cancel",
        _ => return None,
    };
    Some(token)
}

/// Resolve a reply against the offered options. Returns the option *value*.
///
/// Order: numeric selection ("2", "optie 2"), normalized match on value or
/// title, then the synonym table when its token matches an option value.
pub fn resolve(input: &str, options: &[MenuOption]) -> Option<String> {
    let norm = normalize(input);
    if norm.is_empty() {
        return None;
    }

    if let Some(caps) = numeric_re().captures(&norm) {
        if let Ok(n) = caps[1].parse::<usize>() {
            if n >= 1 && n <= options.len() {
                return Some(options[n - 1].value.clone());
            }
        }
    }

    for option in options {
        if normalize(&option.value) == norm || normalize(&option.title) == norm {
            return Some(option.value.clone());
        }
    }

    if let Some(token) = synonym_token(&norm) {
        if options.iter().any(|o| o.value == token) {
            return Some(token.to_string());
        }
    }

    None
}
