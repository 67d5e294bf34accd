//! Payment collaborator: checkout links and completion events.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::PaymentError;
use crate::segment::Segment;
use crate::state::{AttrPatch, LessonType, get_i64, get_str};

/// Order id: `{prefix}-{yyyymmdd}-{conversation id}`.
pub fn order_id(prefix: &str, now: DateTime<FixedOffset>, conversation_id: i64) -> String {
    format!("{prefix}-{}-{conversation_id}", now.format("%Y%m%d"))
}

/// Lesson price in euro cents.
pub fn amount_cents(lesson_type: LessonType) -> i64 {
    match lesson_type {
        LessonType::Trial => 0,
        LessonType::Regular => 4500,
        LessonType::Urgent => 6750,
    }
}

/// Narrow seam in front of the payment gateway.
#[async_trait]
pub trait Payments: Send + Sync {
    /// Create a checkout link for a paid lesson. Returns the payment URL.
    async fn create_checkout(
        &self,
        order_id: &str,
        segment: Segment,
        lesson_type: LessonType,
    ) -> Result<String, PaymentError>;
}

/// Disabled gateway: paid bookings confirm immediately without a link.
pub struct NoPayments;

#[async_trait]
impl Payments for NoPayments {
    async fn create_checkout(
        &self,
        _order_id: &str,
        _segment: Segment,
        _lesson_type: LessonType,
    ) -> Result<String, PaymentError> {
        Err(PaymentError::Checkout("no payment gateway configured".to_string()))
    }
}

/// HTTP client for the payment service.
pub struct HttpPayments {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl HttpPayments {
    pub fn new(
        base_url: String,
        api_key: SecretString,
        timeout: std::time::Duration,
    ) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Checkout(e.to_string()))?;
        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Payments for HttpPayments {
    async fn create_checkout(
        &self,
        order_id: &str,
        segment: Segment,
        lesson_type: LessonType,
    ) -> Result<String, PaymentError> {
        let resp = self
            .client
            .post(format!("{}/checkouts", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({
                "order_id": order_id,
                "segment": segment.to_string(),
                "lesson_type": lesson_type.to_string(),
                "amount_cents": amount_cents(lesson_type),
                "currency": "EUR",
            }))
            .send()
            .await
            .map_err(|e| PaymentError::Checkout(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Checkout(format!("{status}: {body}")));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| PaymentError::Checkout(e.to_string()))?;
        payload
            .get("checkout_url")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| PaymentError::Checkout("no checkout_url in response".to_string()))
    }
}

// ── Completion webhook ──────────────────────────────────────────────

/// A parsed payment-completed event.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub order_id: String,
    pub conversation_id: i64,
    /// Echoed back by the gateway when the checkout carried it; without it
    /// only the conversation record is updated.
    pub contact_id: Option<i64>,
    pub amount_cents: i64,
    pub currency: String,
}

impl PaymentEvent {
    /// Parse a webhook body. Only `checkout.completed` events are relevant;
    /// anything else is `Ok(None)` and gets logged by the caller.
    pub fn from_value(value: &Value) -> Result<Option<Self>, PaymentError> {
        let map = value
            .as_object()
            .ok_or_else(|| PaymentError::InvalidEvent("body is not an object".to_string()))?;

        match get_str(map, "event").as_deref() {
            Some("checkout.completed") => {}
            _ => return Ok(None),
        }

        let order_id = get_str(map, "order_id")
            .ok_or_else(|| PaymentError::InvalidEvent("missing order_id".to_string()))?;
        let conversation_id = get_i64(map, "conversation_id")
            .ok_or_else(|| PaymentError::InvalidEvent("missing conversation_id".to_string()))?;

        Ok(Some(Self {
            order_id,
            conversation_id,
            contact_id: get_i64(map, "contact_id"),
            amount_cents: get_i64(map, "amount_cents").unwrap_or(0),
            currency: get_str(map, "currency").unwrap_or_else(|| "EUR".to_string()),
        }))
    }

    /// Contact attributes set once a payment lands.
    pub fn contact_patch(&self, today: &str) -> AttrPatch {
        AttrPatch::new()
            .set_bool("has_paid_lesson", true)
            .set_bool("has_completed_intake", true)
            .set_bool("lesson_booked", true)
            .set_str("customer_since", today)
    }

    /// Conversation attributes recording the completed payment.
    pub fn conversation_patch(&self) -> AttrPatch {
        AttrPatch::new()
            .set_bool("payment_completed", true)
            .set_str("order_id", self.order_id.clone())
            .set("amount_cents", json!(self.amount_cents))
            .set_str("currency", self.currency.clone())
    }
}
