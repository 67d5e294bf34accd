//! HTTP surface: webhook ingestion and health.
//!
//! The platform delivers webhooks at least once; the delivery cache drops
//! repeats before they reach the orchestrator. A handler failure never
//! bubbles an error status back to the platform (that would only trigger
//! redelivery of a message we cannot process); the customer gets a localized
//! apology instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use secrecy::SecretString;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::dedup::{DeliveryCache, DeliveryKey};
use crate::flows::Orchestrator;
use crate::i18n::{Lang, detect_language, t};
use crate::payments::PaymentEvent;
use crate::signature::{self, SignatureCheck};
use crate::state::{get_i64, get_str};

/// Signature header both webhook sources use.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Pause between receipt and processing, so a burst of platform-side writes
/// (labels, assignment) from the previous turn settles first.
const PROCESS_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub dedup: Arc<Mutex<DeliveryCache>>,
    pub platform_secret: Option<SecretString>,
    pub payment_secret: Option<SecretString>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        platform_secret: Option<SecretString>,
        payment_secret: Option<SecretString>,
    ) -> Self {
        Self {
            orchestrator,
            dedup: Arc::new(Mutex::new(DeliveryCache::default())),
            platform_secret,
            payment_secret,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/platform", post(platform_webhook))
        .route("/webhooks/payments", post(payments_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// One inbound customer message, already unwrapped from the webhook.
#[derive(Debug, Clone, PartialEq)]
struct InboundMessage {
    conversation_id: i64,
    contact_id: i64,
    message_id: i64,
    event: String,
    content: String,
}

/// Pull the relevant message out of a platform webhook. `None` for every
/// delivery the bot should ignore: other event types, outgoing or private
/// messages, agent senders, empty content.
fn extract_message(payload: &Value) -> Option<InboundMessage> {
    let map = payload.as_object()?;
    let event = get_str(map, "event")?;
    if event != "message_created" {
        return None;
    }
    let message_type = map.get("message_type");
    let incoming = matches!(message_type, Some(Value::String(s)) if s == "incoming")
        || matches!(message_type.and_then(Value::as_i64), Some(0));
    if !incoming {
        return None;
    }
    if map.get("private").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    let sender = map.get("sender").and_then(Value::as_object);
    if let Some(sender) = sender {
        if get_str(sender, "type").as_deref() == Some("agent_bot")
            || get_str(sender, "type").as_deref() == Some("user")
        {
            return None;
        }
    }

    let conversation_id = map
        .get("conversation")
        .and_then(Value::as_object)
        .and_then(|c| get_i64(c, "id"))?;
    let contact_id = sender.and_then(|s| get_i64(s, "id"))?;
    let message_id = get_i64(map, "id")?;

    // Interactive menu replies carry the chosen value under
    // content_attributes; it wins over the display text.
    let submitted = map
        .get("content_attributes")
        .and_then(|a| a.get("submitted_values"))
        .and_then(Value::as_array)
        .and_then(|v| v.first())
        .and_then(Value::as_object)
        .and_then(|v| get_str(v, "value"));
    let content = submitted.or_else(|| get_str(map, "content"))?;
    if content.trim().is_empty() {
        return None;
    }

    Some(InboundMessage {
        conversation_id,
        contact_id,
        message_id,
        event,
        content,
    })
}

async fn platform_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if signature::verify(state.platform_secret.as_ref(), header, &body) == SignatureCheck::Rejected
    {
        tracing::warn!("platform webhook rejected: bad signature");
        return StatusCode::UNAUTHORIZED;
    }

    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    let Some(message) = extract_message(&payload) else {
        return StatusCode::OK;
    };

    let key = DeliveryKey {
        conversation_id: message.conversation_id,
        message_id: message.message_id,
        event: message.event.clone(),
    };
    let fresh = state
        .dedup
        .lock()
        .map(|mut cache| cache.mark(key))
        .unwrap_or(true);
    if !fresh {
        tracing::info!(
            conversation_id = message.conversation_id,
            message_id = message.message_id,
            "duplicate delivery dropped"
        );
        return StatusCode::OK;
    }

    tokio::time::sleep(PROCESS_DELAY).await;

    if let Err(e) = state
        .orchestrator
        .handle_message(
            message.conversation_id,
            message.contact_id,
            message.message_id,
            &message.content,
        )
        .await
    {
        tracing::error!(conversation_id = message.conversation_id, error = %e, "message handling failed");
        // Best effort; the delivery stays marked so a redelivery of the
        // same broken message is not re-processed. The apology follows the
        // contact's cached language, or the message's when none is cached.
        let platform = &state.orchestrator.ctx.platform;
        let lang = match platform.contact_attrs(message.contact_id).await {
            Ok(attrs) => get_str(&attrs, "language")
                .map(|l| Lang::parse(&l))
                .unwrap_or_else(|| detect_language(&message.content)),
            Err(_) => detect_language(&message.content),
        };
        let _ = platform
            .send_text(message.conversation_id, &t("error_generic", lang), false)
            .await;
    }
    StatusCode::OK
}

async fn payments_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if signature::verify(state.payment_secret.as_ref(), header, &body) == SignatureCheck::Rejected {
        tracing::warn!("payment webhook rejected: bad signature");
        return StatusCode::UNAUTHORIZED;
    }

    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    let event = match PaymentEvent::from_value(&payload) {
        Ok(Some(event)) => event,
        Ok(None) => return StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "malformed payment event");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(order_id = %event.order_id, conversation_id = event.conversation_id, "payment completed");

    let ctx = &state.orchestrator.ctx;
    let today = ctx.now().format("%Y-%m-%d").to_string();
    if let Some(contact_id) = event.contact_id {
        if !ctx
            .platform
            .merge_contact_attrs(contact_id, &event.contact_patch(&today))
            .await
        {
            tracing::warn!(contact_id, "payment contact update failed");
        }
    }
    if !ctx
        .platform
        .merge_conversation_attrs(event.conversation_id, &event.conversation_patch())
        .await
    {
        tracing::warn!(
            conversation_id = event.conversation_id,
            "payment conversation update failed"
        );
    }
    let lang = match ctx.platform.conversation_attrs(event.conversation_id).await {
        Ok(attrs) => get_str(&attrs, "language")
            .map(|l| Lang::parse(&l))
            .unwrap_or_default(),
        Err(_) => Lang::default(),
    };
    let _ = ctx
        .platform
        .send_text(event.conversation_id, &t("payment_confirmed", lang), false)
        .await;
    StatusCode::OK
}
