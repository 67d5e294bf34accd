//! Typed views over the platform's flat attribute maps.
//!
//! The platform stores contact and conversation attributes as free-form
//! JSON maps. All typing happens here, at the client boundary: parsing is
//! tolerant (booleans may arrive as strings, unknown keys are ignored and
//! preserved by the server-side merge), and legacy intent names from the
//! previous generation of the bot are migrated on read.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::i18n::Lang;

// ── Pending intent ──────────────────────────────────────────────────

/// The currently active conversation flow. Stored on the conversation under
/// `pending_intent`; uniquely selects the next handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingIntent {
    Idle,
    MenuSelection,
    IntakeChoice,
    Intake,
    IntakeFreeText,
    IntakeFreeTextConfirm,
    PrefillConfirmation,
    PrefillAction,
    Planning,
    InfoMenu,
    InfoMenuFollowUp,
    TariffsFollowUp,
    HandoffMenu,
    Handoff,
    EmailRequest,
    WipeConfirmation,
}

impl Default for PendingIntent {
    fn default() -> Self {
        Self::Idle
    }
}

impl PendingIntent {
    /// Parse a stored value. Unknown values fall back to `Idle` so a stale
    /// or foreign tag can never wedge a conversation; legacy names written
    /// by the previous bot generation are migrated here.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "idle" | "" | "none" => Self::Idle,
            "menu_selection" => Self::MenuSelection,
            "intake_choice" => Self::IntakeChoice,
            "intake" => Self::Intake,
            "intake_free_text" => Self::IntakeFreeText,
            "intake_free_text_confirm" => Self::IntakeFreeTextConfirm,
            "prefill_confirmation" => Self::PrefillConfirmation,
            "prefill_action" | "prefill_confirmation_action" => Self::PrefillAction,
            "planning" => Self::Planning,
            "info_menu" => Self::InfoMenu,
            "info_menu_follow_up" => Self::InfoMenuFollowUp,
            "tariffs_follow_up" => Self::TariffsFollowUp,
            "handoff_menu" => Self::HandoffMenu,
            "handoff" => Self::Handoff,
            // Legacy tag from the v0 attribute schema.
            "email_request" | "ask_email" => Self::EmailRequest,
            "wipe_confirmation" => Self::WipeConfirmation,
            other => {
                tracing::debug!(intent = other, "unknown pending_intent; treating as idle");
                Self::Idle
            }
        }
    }

    /// Intents under which `intake_step` is meaningful.
    pub fn is_intake_family(&self) -> bool {
        matches!(
            self,
            Self::Intake | Self::IntakeFreeText | Self::IntakeFreeTextConfirm
        )
    }
}

impl std::fmt::Display for PendingIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::MenuSelection => "menu_selection",
            Self::IntakeChoice => "intake_choice",
            Self::Intake => "intake",
            Self::IntakeFreeText => "intake_free_text",
            Self::IntakeFreeTextConfirm => "intake_free_text_confirm",
            Self::PrefillConfirmation => "prefill_confirmation",
            Self::PrefillAction => "prefill_action",
            Self::Planning => "planning",
            Self::InfoMenu => "info_menu",
            Self::InfoMenuFollowUp => "info_menu_follow_up",
            Self::TariffsFollowUp => "tariffs_follow_up",
            Self::HandoffMenu => "handoff_menu",
            Self::Handoff => "handoff",
            Self::EmailRequest => "email_request",
            Self::WipeConfirmation => "wipe_confirmation",
        };
        write!(f, "{s}")
    }
}

// ── Intake step ─────────────────────────────────────────────────────

/// Position in the scripted intake wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStep {
    ForWho,
    LearnerName,
    SchoolLevel,
    Topic,
    Goals,
    PreferredTimes,
    LessonMode,
    GuardianName,
    GuardianPhone,
    Summary,
}

impl IntakeStep {
    /// The next step in the wizard. The guardian steps only appear when the
    /// learner is a minor registering for themselves.
    pub fn next(&self, needs_guardian: bool) -> Option<IntakeStep> {
        use IntakeStep::*;
        Some(match self {
            ForWho => LearnerName,
            LearnerName => SchoolLevel,
            SchoolLevel => Topic,
            Topic => Goals,
            Goals => PreferredTimes,
            PreferredTimes => LessonMode,
            LessonMode => {
                if needs_guardian {
                    GuardianName
                } else {
                    Summary
                }
            }
            GuardianName => GuardianPhone,
            GuardianPhone => Summary,
            Summary => return None,
        })
    }

    pub fn parse(raw: &str) -> Option<Self> {
        use IntakeStep::*;
        Some(match raw.trim() {
            "for_who" => ForWho,
            "learner_name" => LearnerName,
            "school_level" => SchoolLevel,
            "topic" => Topic,
            "goals" => Goals,
            "preferred_times" => PreferredTimes,
            "lesson_mode" => LessonMode,
            "guardian_name" => GuardianName,
            "guardian_phone" => GuardianPhone,
            "summary" => Summary,
            _ => return None,
        })
    }
}

impl std::fmt::Display for IntakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ForWho => "for_who",
            Self::LearnerName => "learner_name",
            Self::SchoolLevel => "school_level",
            Self::Topic => "topic",
            Self::Goals => "goals",
            Self::PreferredTimes => "preferred_times",
            Self::LessonMode => "lesson_mode",
            Self::GuardianName => "guardian_name",
            Self::GuardianPhone => "guardian_phone",
            Self::Summary => "summary",
        };
        write!(f, "{s}")
    }
}

// ── Lesson type ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Trial,
    Regular,
    Urgent,
}

impl LessonType {
    /// Paid lesson types defer booking confirmation to the payment flow.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Trial)
    }

    /// Lesson duration in minutes. Trials are shortened regardless of the
    /// planning profile.
    pub fn duration_minutes(&self) -> i64 {
        match self {
            Self::Trial => 30,
            Self::Regular => 60,
            Self::Urgent => 90,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "trial" => Some(Self::Trial),
            "regular" => Some(Self::Regular),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn label(&self, lang: Lang) -> &'static str {
        match (self, lang) {
            (Self::Trial, Lang::Nl) => "proefles",
            (Self::Trial, Lang::En) => "trial lesson",
            (Self::Regular, Lang::Nl) => "bijles",
            (Self::Regular, Lang::En) => "lesson",
            (Self::Urgent, Lang::Nl) => "spoedles",
            (Self::Urgent, Lang::En) => "urgent session",
        }
    }
}

impl std::fmt::Display for LessonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trial => "trial",
            Self::Regular => "regular",
            Self::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

// ── Candidate slot ──────────────────────────────────────────────────

/// A proposed, not-yet-committed lesson time. Held only on the conversation
/// until confirmed or superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub label: String,
}

// ── Tolerant map accessors ──────────────────────────────────────────

pub fn get_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn get_bool(map: &Map<String, Value>, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

pub fn get_i64(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A partial attribute update, merged (never replacing) on the platform side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrPatch(pub Map<String, Value>);

impl AttrPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn set_str(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, Value::String(value.into()))
    }

    pub fn set_bool(self, key: &str, value: bool) -> Self {
        self.set(key, Value::Bool(value))
    }

    pub fn merge(&mut self, other: AttrPatch) {
        for (k, v) in other.0 {
            self.0.insert(k, v);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Contact profile ─────────────────────────────────────────────────

/// Typed view of the durable contact record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactProfile {
    pub language: Option<Lang>,
    pub is_adult: Option<bool>,
    pub for_who: Option<String>,
    pub learner_name: Option<String>,
    pub school_level: Option<String>,
    pub topic_primary: Option<String>,
    pub topic_secondary: Option<String>,
    pub goals: Option<String>,
    pub preferred_times: Option<String>,
    pub lesson_mode: Option<String>,
    pub relationship_to_learner: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub school_name: Option<String>,
    pub current_grade: Option<String>,
    pub referral_source: Option<String>,
    pub email: Option<String>,
    pub customer_since: Option<String>,
    pub has_paid_lesson: bool,
    pub has_completed_intake: bool,
    pub trial_lesson_completed: bool,
    pub lesson_booked: bool,
    pub weekend: bool,
    pub returning_broadcast: bool,
}

/// Contact attribute keys this bot owns (used by the wipe flow).
pub const CONTACT_KEYS: &[&str] = &[
    "language",
    "segment",
    "is_adult",
    "for_who",
    "learner_name",
    "school_level",
    "topic_primary",
    "topic_secondary",
    "goals",
    "preferred_times",
    "lesson_mode",
    "relationship_to_learner",
    "guardian_name",
    "guardian_phone",
    "school_name",
    "current_grade",
    "referral_source",
    "email",
    "customer_since",
    "has_paid_lesson",
    "has_completed_intake",
    "trial_lesson_completed",
    "lesson_booked",
];

impl ContactProfile {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            language: get_str(map, "language").map(|l| Lang::parse(&l)),
            is_adult: match map.get("is_adult") {
                None | Some(Value::Null) => None,
                _ => Some(get_bool(map, "is_adult")),
            },
            for_who: get_str(map, "for_who"),
            learner_name: get_str(map, "learner_name"),
            school_level: get_str(map, "school_level"),
            topic_primary: get_str(map, "topic_primary"),
            topic_secondary: get_str(map, "topic_secondary"),
            goals: get_str(map, "goals"),
            preferred_times: get_str(map, "preferred_times"),
            lesson_mode: get_str(map, "lesson_mode"),
            relationship_to_learner: get_str(map, "relationship_to_learner"),
            guardian_name: get_str(map, "guardian_name"),
            guardian_phone: get_str(map, "guardian_phone"),
            school_name: get_str(map, "school_name"),
            current_grade: get_str(map, "current_grade"),
            referral_source: get_str(map, "referral_source"),
            email: get_str(map, "email"),
            customer_since: get_str(map, "customer_since"),
            has_paid_lesson: get_bool(map, "has_paid_lesson"),
            has_completed_intake: get_bool(map, "has_completed_intake"),
            trial_lesson_completed: get_bool(map, "trial_lesson_completed"),
            lesson_booked: get_bool(map, "lesson_booked"),
            weekend: get_bool(map, "weekend"),
            returning_broadcast: get_bool(map, "returning_broadcast"),
        }
    }

    /// Whether the learner is (or must be assumed) a minor. An explicit
    /// `is_adult` flag wins; otherwise secondary-school levels imply minor.
    pub fn is_minor(&self) -> bool {
        match self.is_adult {
            Some(adult) => !adult,
            None => matches!(
                self.school_level.as_deref(),
                Some("po") | Some("vmbo") | Some("havo") | Some("vwo")
            ),
        }
    }

    /// Guardian gate: a minor registering for themselves may not be offered
    /// slots until guardian name and phone are both present.
    pub fn guardian_complete(&self) -> bool {
        self.guardian_name.is_some() && self.guardian_phone.is_some()
    }

    pub fn needs_guardian(&self) -> bool {
        self.is_minor()
            && matches!(self.for_who.as_deref(), Some("self") | None)
            && !self.guardian_complete()
    }
}

// ── Conversation state ──────────────────────────────────────────────

/// Typed view of the per-thread conversation record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub pending_intent: PendingIntent,
    pub intake_step: Option<IntakeStep>,
    pub last_bot_message: Option<String>,
    pub last_processed_message_id: Option<i64>,
    pub has_been_prefilled: bool,
    pub confirm_retries: i64,
    pub lesson_type: Option<LessonType>,
    pub suggested_slots: Vec<CandidateSlot>,
    pub slot_page: i64,
    pub order_id: Option<String>,
    pub language: Option<Lang>,
    /// Intake fields proposed by analysis or the wizard, awaiting the
    /// confirm/correct loop.
    pub proposed: Map<String, Value>,
}

impl ConversationState {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let suggested_slots = map
            .get("suggested_slots")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let proposed = match map.get("proposed_fields") {
            Some(Value::Object(m)) => m.clone(),
            // v0 schema stored the proposal as a JSON string.
            Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_default(),
            _ => Map::new(),
        };
        Self {
            pending_intent: get_str(map, "pending_intent")
                .map(|s| PendingIntent::parse(&s))
                .unwrap_or_default(),
            intake_step: get_str(map, "intake_step").and_then(|s| IntakeStep::parse(&s)),
            last_bot_message: get_str(map, "last_bot_message"),
            last_processed_message_id: get_i64(map, "last_processed_message_id"),
            has_been_prefilled: get_bool(map, "has_been_prefilled"),
            confirm_retries: get_i64(map, "confirm_retries").unwrap_or(0),
            lesson_type: get_str(map, "lesson_type").and_then(|s| LessonType::parse(&s)),
            suggested_slots,
            slot_page: get_i64(map, "slot_page").unwrap_or(0),
            order_id: get_str(map, "order_id"),
            language: get_str(map, "language").map(|l| Lang::parse(&l)),
            proposed,
        }
    }

    /// Effective reply language: conversation override, else contact, else
    /// Dutch.
    pub fn lang(&self, contact: &ContactProfile) -> Lang {
        self.language.or(contact.language).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn intent_display_matches_parse() {
        let all = [
            PendingIntent::Idle,
            PendingIntent::MenuSelection,
            PendingIntent::IntakeChoice,
            PendingIntent::Intake,
            PendingIntent::IntakeFreeText,
            PendingIntent::IntakeFreeTextConfirm,
            PendingIntent::PrefillConfirmation,
            PendingIntent::PrefillAction,
            PendingIntent::Planning,
            PendingIntent::InfoMenu,
            PendingIntent::InfoMenuFollowUp,
            PendingIntent::TariffsFollowUp,
            PendingIntent::HandoffMenu,
            PendingIntent::Handoff,
            PendingIntent::EmailRequest,
            PendingIntent::WipeConfirmation,
        ];
        for intent in all {
            assert_eq!(PendingIntent::parse(&intent.to_string()), intent);
            // Display and serde agree on the wire form.
            assert_eq!(
                serde_json::to_string(&intent).unwrap(),
                format!("\"{intent}\"")
            );
        }
    }

    #[test]
    fn unknown_intent_falls_back_to_idle() {
        assert_eq!(PendingIntent::parse("whatever"), PendingIntent::Idle);
        assert_eq!(PendingIntent::parse(""), PendingIntent::Idle);
    }

    #[test]
    fn legacy_intent_names_migrate() {
        assert_eq!(PendingIntent::parse("ask_email"), PendingIntent::EmailRequest);
        assert_eq!(
            PendingIntent::parse("prefill_confirmation_action"),
            PendingIntent::PrefillAction
        );
    }

    #[test]
    fn intake_steps_walk_without_guardian() {
        let mut step = IntakeStep::ForWho;
        let mut seen = vec![step];
        while let Some(next) = step.next(false) {
            seen.push(next);
            step = next;
        }
        assert_eq!(*seen.last().unwrap(), IntakeStep::Summary);
        assert!(!seen.contains(&IntakeStep::GuardianName));
    }

    #[test]
    fn intake_steps_include_guardian_for_minor() {
        let step = IntakeStep::LessonMode;
        assert_eq!(step.next(true), Some(IntakeStep::GuardianName));
        assert_eq!(IntakeStep::GuardianName.next(true), Some(IntakeStep::GuardianPhone));
        assert_eq!(IntakeStep::GuardianPhone.next(true), Some(IntakeStep::Summary));
    }

    #[test]
    fn contact_parses_string_booleans() {
        let contact = ContactProfile::from_map(&map(json!({
            "has_completed_intake": "true",
            "lesson_booked": false,
            "is_adult": "false",
        })));
        assert!(contact.has_completed_intake);
        assert!(!contact.lesson_booked);
        assert_eq!(contact.is_adult, Some(false));
        assert!(contact.is_minor());
    }

    #[test]
    fn minor_inferred_from_school_level() {
        let contact = ContactProfile::from_map(&map(json!({"school_level": "havo"})));
        assert!(contact.is_minor());
        let adult = ContactProfile::from_map(&map(json!({"school_level": "university_wo"})));
        assert!(!adult.is_minor());
    }

    #[test]
    fn guardian_gate() {
        let mut contact = ContactProfile::from_map(&map(json!({
            "is_adult": false,
            "for_who": "self",
        })));
        assert!(contact.needs_guardian());
        contact.guardian_name = Some("Jan".into());
        assert!(contact.needs_guardian());
        contact.guardian_phone = Some("0612345678".into());
        assert!(!contact.needs_guardian());
    }

    #[test]
    fn conversation_parses_legacy_proposal_string() {
        let conv = ConversationState::from_map(&map(json!({
            "pending_intent": "ask_email",
            "proposed_fields": "{\"learner_name\":\"Maria\"}",
            "confirm_retries": "1",
        })));
        assert_eq!(conv.pending_intent, PendingIntent::EmailRequest);
        assert_eq!(conv.proposed.get("learner_name"), Some(&json!("Maria")));
        assert_eq!(conv.confirm_retries, 1);
    }

    #[test]
    fn conversation_defaults_are_safe() {
        let conv = ConversationState::from_map(&Map::new());
        assert_eq!(conv.pending_intent, PendingIntent::Idle);
        assert!(conv.suggested_slots.is_empty());
        assert!(!conv.has_been_prefilled);
    }

    #[test]
    fn attr_patch_merges() {
        let mut a = AttrPatch::new().set_str("x", "1");
        a.merge(AttrPatch::new().set_str("x", "2").set_bool("y", true));
        assert_eq!(a.0.get("x"), Some(&json!("2")));
        assert_eq!(a.0.get("y"), Some(&json!(true)));
    }

    #[test]
    fn lesson_type_payment_and_duration() {
        assert!(!LessonType::Trial.is_paid());
        assert!(LessonType::Regular.is_paid());
        assert_eq!(LessonType::Trial.duration_minutes(), 30);
        assert_eq!(LessonType::Regular.duration_minutes(), 60);
    }
}
