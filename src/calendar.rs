//! Calendar collaborator: free/busy queries and event creation.
//!
//! Event titles and colors follow the practice's triage convention so a
//! human can read the week at a glance: `{name} – {lesson type} – {status}
//! [ – {location}]`, with the status mapped to a calendar color.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::CalendarError;

/// One busy interval from the calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Request to put one lesson on the calendar.
#[derive(Debug, Clone, Serialize)]
pub struct EventRequest {
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub color_id: String,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Narrow seam in front of the calendar service.
#[async_trait]
pub trait Calendar: Send + Sync {
    async fn busy(
        &self,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<BusyInterval>, CalendarError>;

    async fn create_event(&self, event: &EventRequest) -> Result<(), CalendarError>;
}

/// Disabled calendar used when no service is configured; the slot engine
/// then runs on locally generated candidates only.
pub struct NoCalendar;

#[async_trait]
impl Calendar for NoCalendar {
    async fn busy(
        &self,
        _from: DateTime<FixedOffset>,
        _to: DateTime<FixedOffset>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        Err(CalendarError::FreeBusy("no calendar configured".to_string()))
    }

    async fn create_event(&self, event: &EventRequest) -> Result<(), CalendarError> {
        tracing::warn!(title = %event.title, "no calendar configured; event not created");
        Ok(())
    }
}

/// Compose an event title: `{name} – {lesson type} – {status}[ – {location}]`.
pub fn event_title(name: &str, lesson_type: &str, status: &str, location: Option<&str>) -> String {
    let mut parts = vec![name, lesson_type, status];
    if let Some(loc) = location {
        parts.push(loc);
    }
    parts.join(" – ")
}

/// Status → calendar color id, for human triage.
pub fn color_for_status(status: &str) -> &'static str {
    match status {
        "definitief" => "5",
        "voorstel" => "11",
        "proefles" | "intake" => "1",
        "schoolles" => "3",
        "vervanging" => "8",
        "follow-up" | "herinnering" => "6",
        _ => "5",
    }
}

/// HTTP client for the practice's calendar service.
pub struct HttpCalendar {
    base_url: String,
    calendar_id: String,
    client: reqwest::Client,
}

impl HttpCalendar {
    pub fn new(
        base_url: String,
        calendar_id: String,
        timeout: std::time::Duration,
    ) -> Result<Self, CalendarError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::FreeBusy(e.to_string()))?;
        Ok(Self {
            base_url,
            calendar_id,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/calendars/{}/{path}", self.base_url, self.calendar_id)
    }
}

#[async_trait]
impl Calendar for HttpCalendar {
    async fn busy(
        &self,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let resp = self
            .client
            .get(self.api_url("freebusy"))
            .query(&[("from", from.to_rfc3339()), ("to", to.to_rfc3339())])
            .send()
            .await
            .map_err(|e| CalendarError::FreeBusy(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CalendarError::FreeBusy(format!("status {status}")));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| CalendarError::FreeBusy(e.to_string()))?;
        let intervals = payload
            .get("busy")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(intervals).map_err(|e| CalendarError::FreeBusy(e.to_string()))
    }

    async fn create_event(&self, event: &EventRequest) -> Result<(), CalendarError> {
        let resp = self
            .client
            .post(self.api_url("events"))
            .json(&json!({
                "title": event.title,
                "start": event.start.to_rfc3339(),
                "end": event.end.to_rfc3339(),
                "color_id": event.color_id,
                "location": event.location,
                "description": event.description,
            }))
            .send()
            .await
            .map_err(|e| CalendarError::CreateEvent(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::CreateEvent(format!("{status}: {body}")));
        }
        tracing::info!(title = %event.title, start = %event.start, "calendar event created");
        Ok(())
    }
}
