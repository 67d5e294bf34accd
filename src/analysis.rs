//! Text-analysis collaborator: single-shot structured extraction.
//!
//! Two uses: prefill extraction from a customer's first free-text message,
//! and interpreting a free-text reply against a suggested slot list. Both
//! are strictly best-effort — an empty, malformed or timed-out response is
//! reported as "no result" and the caller falls back to a non-AI path.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};

use crate::error::AnalysisError;
use crate::i18n::Lang;
use crate::state::{AttrPatch, CandidateSlot, get_bool, get_str};

// ── Extraction result ───────────────────────────────────────────────

/// Fields extracted from one free-text message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntakeAnalysis {
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
    pub school_name: Option<String>,
    pub current_grade: Option<String>,
    pub referral_source: Option<String>,
}

impl IntakeAnalysis {
    /// Build from a model response object, normalizing level/topic/mode to
    /// canonical tokens. Non-objects yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let analysis = Self {
            is_adult: match map.get("is_adult") {
                None | Some(Value::Null) => None,
                _ => Some(get_bool(map, "is_adult")),
            },
            for_who: get_str(map, "for_who").map(|v| normalize_for_who(&v)),
            learner_name: get_str(map, "learner_name"),
            school_level: get_str(map, "school_level").map(|v| map_school_level(&v)),
            topic_primary: get_str(map, "topic_primary").map(|v| map_topic(&v)),
            topic_secondary: get_str(map, "topic_secondary").map(|v| map_topic(&v)),
            goals: get_str(map, "goals"),
            preferred_times: get_str(map, "preferred_times"),
            lesson_mode: get_str(map, "lesson_mode").map(|v| normalize_mode(&v)),
            relationship_to_learner: get_str(map, "relationship_to_learner"),
            school_name: get_str(map, "school_name"),
            current_grade: get_str(map, "current_grade"),
            referral_source: get_str(map, "referral_source"),
        };
        Some(analysis)
    }

    /// A prefill is only worth confirming when it identifies the learner
    /// and pins down both level and subject.
    pub fn is_sufficient(&self) -> bool {
        self.learner_name.is_some() && self.school_level.is_some() && self.topic_primary.is_some()
    }

    /// Attribute patch with every extracted field.
    pub fn to_patch(&self) -> AttrPatch {
        let mut patch = AttrPatch::new();
        let mut set = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                patch.0.insert(key.to_string(), Value::String(v.clone()));
            }
        };
        set("for_who", &self.for_who);
        set("learner_name", &self.learner_name);
        set("school_level", &self.school_level);
        set("topic_primary", &self.topic_primary);
        set("topic_secondary", &self.topic_secondary);
        set("goals", &self.goals);
        set("preferred_times", &self.preferred_times);
        set("lesson_mode", &self.lesson_mode);
        set("relationship_to_learner", &self.relationship_to_learner);
        set("school_name", &self.school_name);
        set("current_grade", &self.current_grade);
        set("referral_source", &self.referral_source);
        if let Some(adult) = self.is_adult {
            patch.0.insert("is_adult".to_string(), Value::Bool(adult));
        }
        patch
    }

    /// Human-readable summary lines for the confirmation menu.
    pub fn summary_lines(&self, lang: Lang) -> Vec<String> {
        let label = |nl: &str, en: &str| match lang {
            Lang::Nl => nl.to_string(),
            Lang::En => en.to_string(),
        };
        let mut lines = Vec::new();
        let mut push = |name: String, value: &Option<String>| {
            if let Some(v) = value {
                lines.push(format!("• {name}: {v}"));
            }
        };
        push(label("Leerling", "Student"), &self.learner_name);
        push(label("Niveau", "Level"), &self.school_level);
        push(label("Vak", "Subject"), &self.topic_primary);
        push(label("Doel", "Goal"), &self.goals);
        push(label("Voorkeurstijden", "Preferred times"), &self.preferred_times);
        push(label("Lesvorm", "Mode"), &self.lesson_mode);
        lines
    }
}

// ── Value normalization ─────────────────────────────────────────────

pub fn map_school_level(raw: &str) -> String {
    let r = raw.trim().to_lowercase();
    let token = if r.contains("basis") || r == "po" || r.contains("primary") {
        "po"
    } else if r.contains("vmbo") {
        "vmbo"
    } else if r.contains("havo") {
        "havo"
    } else if r.contains("vwo") || r.contains("gymnasium") || r.contains("atheneum") {
        "vwo"
    } else if r.contains("mbo") {
        "mbo"
    } else if r.contains("hbo") {
        "university_hbo"
    } else if r == "wo" || r.contains("universiteit") || r.contains("university") {
        "university_wo"
    } else {
        "adult"
    };
    token.to_string()
}

pub fn map_topic(raw: &str) -> String {
    let r = raw.trim().to_lowercase();
    let token = if r.contains("wiskunde") || r.contains("math") || r.contains("rekenen") {
        "math"
    } else if r.contains("statistiek") || r.contains("stat") {
        "stats"
    } else if r.contains("natuurkunde") || r.contains("physics") {
        "science"
    } else if r.contains("scheikunde") || r.contains("chem") {
        "chemistry"
    } else if r.contains("engels") || r.contains("english") {
        "english"
    } else if r.contains("programm") || r.contains("python") || r.contains("informatica") {
        "programming"
    } else {
        "other"
    };
    token.to_string()
}

fn normalize_for_who(raw: &str) -> String {
    let r = raw.trim().to_lowercase();
    if r.contains("self") || r.contains("mezelf") || r.contains("myself") {
        "self".to_string()
    } else if r.contains("child")
        || r.contains("kind")
        || r.contains("zoon")
        || r.contains("dochter")
        || r.contains("son")
        || r.contains("daughter")
    {
        "child".to_string()
    } else {
        "other".to_string()
    }
}

fn normalize_mode(raw: &str) -> String {
    let r = raw.trim().to_lowercase();
    if r.contains("online") || r.contains("remote") {
        "online".to_string()
    } else {
        "in_person".to_string()
    }
}

// ── Slot interpretation ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotIntent {
    Select,
    MoreOptions,
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotInterpretation {
    pub intent: SlotIntent,
    pub chosen_start: Option<DateTime<FixedOffset>>,
}

// ── Collaborator trait ──────────────────────────────────────────────

/// Narrow seam in front of the language model.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Extract intake fields from a free-text message. `Ok(None)` means the
    /// model produced nothing usable; the caller must fall back.
    async fn analyze_intake(&self, message: &str)
    -> Result<Option<IntakeAnalysis>, AnalysisError>;

    /// Interpret a free-text reply against the offered slots.
    async fn interpret_slot_choice(
        &self,
        message: &str,
        slots: &[CandidateSlot],
    ) -> Result<SlotInterpretation, AnalysisError>;
}

/// Disabled analyzer used when no API key is configured.
pub struct NoAnalyzer;

#[async_trait]
impl Analyzer for NoAnalyzer {
    async fn analyze_intake(
        &self,
        _message: &str,
    ) -> Result<Option<IntakeAnalysis>, AnalysisError> {
        Err(AnalysisError::NotConfigured)
    }

    async fn interpret_slot_choice(
        &self,
        _message: &str,
        _slots: &[CandidateSlot],
    ) -> Result<SlotInterpretation, AnalysisError> {
        Err(AnalysisError::NotConfigured)
    }
}

// ── OpenAI-backed implementation ────────────────────────────────────

const INTAKE_SYSTEM_PROMPT: &str = "\
You extract tutoring-intake fields from one customer message (Dutch or \
English). Respond with a single JSON object; omit fields you are not sure \
about. Fields: is_adult (bool), for_who (self|child|other), learner_name, \
school_level, topic_primary, topic_secondary, goals, preferred_times, \
lesson_mode (online|in_person), relationship_to_learner, school_name, \
current_grade, referral_source. No prose.";

pub struct OpenAiAnalyzer {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiAnalyzer {
    pub fn new(
        api_key: SecretString,
        model: String,
        timeout: std::time::Duration,
    ) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;
        Ok(Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            client,
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AnalysisError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnalysisError::RequestFailed(format!("{status}: {body}")));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| AnalysisError::BadResponse(e.to_string()))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AnalysisError::BadResponse("no completion content".to_string()))
    }
}

/// Slice the first `{…}` span out of a completion and parse it. Models
/// occasionally wrap JSON in prose or code fences.
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    async fn analyze_intake(
        &self,
        message: &str,
    ) -> Result<Option<IntakeAnalysis>, AnalysisError> {
        let content = self.complete(INTAKE_SYSTEM_PROMPT, message).await?;
        let Some(value) = extract_json(&content) else {
            tracing::warn!("intake analysis returned non-JSON content");
            return Ok(None);
        };
        let analysis = IntakeAnalysis::from_value(&value);
        if analysis == Some(IntakeAnalysis::default()) {
            return Ok(None);
        }
        Ok(analysis)
    }

    async fn interpret_slot_choice(
        &self,
        message: &str,
        slots: &[CandidateSlot],
    ) -> Result<SlotInterpretation, AnalysisError> {
        let listing: Vec<String> = slots
            .iter()
            .map(|s| format!("{} ({})", s.start.to_rfc3339(), s.label))
            .collect();
        let system = "\
You match a customer's reply to one of the offered lesson slots. Respond \
with JSON {\"intent\": \"select\"|\"more_options\"|\"invalid\", \
\"chosen_start\": \"<RFC3339 of the matched slot or null>\"}. Only select a \
slot from the offered list. No prose.";
        let user = format!("Offered slots:\n{}\n\nReply: {message}", listing.join("\n"));

        let content = self.complete(system, &user).await?;
        let value =
            extract_json(&content).ok_or_else(|| AnalysisError::BadResponse(content.clone()))?;
        let map: &Map<String, Value> = value
            .as_object()
            .ok_or_else(|| AnalysisError::BadResponse("expected object".to_string()))?;

        let intent = match get_str(map, "intent").as_deref() {
            Some("select") => SlotIntent::Select,
            Some("more_options") => SlotIntent::MoreOptions,
            _ => SlotIntent::Invalid,
        };
        let chosen_start = get_str(map, "chosen_start")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            // Never book a time the model invented.
            .filter(|start| slots.iter().any(|s| s.start == *start));

        Ok(SlotInterpretation {
            intent,
            chosen_start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extract_json_from_fenced_content() {
        let text = "```json\n{\"learner_name\": \"Maria\"}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["learner_name"], "Maria");
    }

    #[test]
    fn extract_json_rejects_garbage() {
        assert!(extract_json("no braces here").is_none());
        assert!(extract_json("}{").is_none());
    }

    #[test]
    fn analysis_normalizes_levels_and_topics() {
        let value = json!({
            "for_who": "my daughter",
            "learner_name": "Maria",
            "school_level": "Havo 5",
            "topic_primary": "wiskunde B",
            "preferred_times": "woensdagmiddag",
        });
        let a = IntakeAnalysis::from_value(&value).unwrap();
        assert_eq!(a.for_who.as_deref(), Some("child"));
        assert_eq!(a.school_level.as_deref(), Some("havo"));
        assert_eq!(a.topic_primary.as_deref(), Some("math"));
        assert!(a.is_sufficient());
    }

    #[test]
    fn analysis_insufficient_without_core_fields() {
        let a = IntakeAnalysis::from_value(&json!({"goals": "betere cijfers"})).unwrap();
        assert!(!a.is_sufficient());
    }

    #[test]
    fn non_object_yields_none() {
        assert!(IntakeAnalysis::from_value(&json!("hello")).is_none());
        assert!(IntakeAnalysis::from_value(&json!([1, 2])).is_none());
    }

    #[test]
    fn patch_contains_only_extracted_fields() {
        let a = IntakeAnalysis {
            learner_name: Some("Maria".into()),
            is_adult: Some(false),
            ..Default::default()
        };
        let patch = a.to_patch();
        assert_eq!(patch.0.len(), 2);
        assert_eq!(patch.0.get("learner_name"), Some(&json!("Maria")));
        assert_eq!(patch.0.get("is_adult"), Some(&json!(false)));
    }

    #[test]
    fn school_level_mapping() {
        assert_eq!(map_school_level("basisschool"), "po");
        assert_eq!(map_school_level("HAVO 4"), "havo");
        assert_eq!(map_school_level("gymnasium"), "vwo");
        assert_eq!(map_school_level("hbo"), "university_hbo");
        assert_eq!(map_school_level("iets vaags"), "adult");
    }

    #[test]
    fn topic_mapping() {
        assert_eq!(map_topic("Wiskunde A"), "math");
        assert_eq!(map_topic("statistics"), "stats");
        assert_eq!(map_topic("scheikunde"), "chemistry");
        assert_eq!(map_topic("geschiedenis"), "other");
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let analyzer = OpenAiAnalyzer::new(
            SecretString::from("sk-test"),
            "gpt-4o-mini".to_string(),
            std::time::Duration::from_millis(200),
        )
        .unwrap()
        .with_base_url("http://127.0.0.1:9");

        let err = analyzer.analyze_intake("hallo").await.unwrap_err();
        assert!(matches!(err, AnalysisError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn no_analyzer_reports_not_configured() {
        let err = NoAnalyzer.analyze_intake("hallo").await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotConfigured));
    }

    #[test]
    fn slot_interpretation_filters_invented_times() {
        // Mirrors the filter in interpret_slot_choice.
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let slot = CandidateSlot {
            start: tz.with_ymd_and_hms(2026, 9, 2, 14, 0, 0).unwrap(),
            end: tz.with_ymd_and_hms(2026, 9, 2, 15, 0, 0).unwrap(),
            label: "wo 2 sep 14:00".to_string(),
        };
        let offered = vec![slot.clone()];
        let invented = tz.with_ymd_and_hms(2026, 9, 3, 14, 0, 0).unwrap();
        assert!(offered.iter().any(|s| s.start == slot.start));
        assert!(!offered.iter().any(|s| s.start == invented));
    }
}
