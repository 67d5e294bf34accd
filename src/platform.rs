//! Messaging-platform client (Chatwoot-compatible REST API).
//!
//! The platform owns all durable state: contact and conversation attribute
//! maps, labels, and message history. This client exposes the narrow surface
//! the flows need. Attribute writes merge (never replace) and report failure
//! as `false` so a failed write can never block a user-facing reply.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};

use crate::error::PlatformError;
use crate::menu::{self, MenuOption};
use crate::state::AttrPatch;

/// Outbound surface towards the messaging platform.
#[async_trait]
pub trait Messaging: Send + Sync {
    async fn contact_attrs(&self, contact_id: i64) -> Result<Map<String, Value>, PlatformError>;

    /// Merge `patch` into the contact's attributes. Returns `false` on
    /// failure (logged, never fatal).
    async fn merge_contact_attrs(&self, contact_id: i64, patch: &AttrPatch) -> bool;

    async fn conversation_attrs(
        &self,
        conversation_id: i64,
    ) -> Result<Map<String, Value>, PlatformError>;

    async fn merge_conversation_attrs(&self, conversation_id: i64, patch: &AttrPatch) -> bool;

    /// Send free text. `private` posts an internal note invisible to the
    /// customer.
    async fn send_text(
        &self,
        conversation_id: i64,
        body: &str,
        private: bool,
    ) -> Result<(), PlatformError>;

    /// Send a single-choice menu. Implementations clamp to delivery limits.
    async fn send_menu(
        &self,
        conversation_id: i64,
        body: &str,
        options: &[MenuOption],
    ) -> Result<(), PlatformError>;

    /// Add labels to the conversation (merged with existing ones).
    async fn add_labels(&self, conversation_id: i64, labels: &[&str]) -> bool;

    /// Reassign the conversation to a human agent.
    async fn assign(&self, conversation_id: i64, agent_id: i64) -> bool;
}

/// REST client for a Chatwoot-compatible platform.
pub struct ChatwootClient {
    base_url: String,
    account_id: i64,
    token: SecretString,
    client: reqwest::Client,
}

impl ChatwootClient {
    pub fn new(
        base_url: String,
        account_id: i64,
        token: SecretString,
        timeout: std::time::Duration,
    ) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::RequestFailed {
                endpoint: "client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url,
            account_id,
            token,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/{path}",
            self.base_url, self.account_id
        )
    }

    async fn get_json(&self, path: &str) -> Result<Value, PlatformError> {
        let url = self.api_url(path);
        let resp = self
            .client
            .get(&url)
            .header("api_access_token", self.token.expose_secret())
            .send()
            .await
            .map_err(|e| PlatformError::RequestFailed {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::BadStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json().await.map_err(|e| PlatformError::BadPayload {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<Value, PlatformError> {
        let url = self.api_url(path);
        let resp = self
            .client
            .request(method, &url)
            .header("api_access_token", self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| PlatformError::RequestFailed {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::BadStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await.unwrap_or(Value::Null))
    }
}

/// Pull a custom-attribute map out of a contact/conversation payload,
/// tolerating both wrapped (`payload`) and bare shapes.
fn extract_custom_attrs(payload: &Value) -> Map<String, Value> {
    let node = payload.get("payload").unwrap_or(payload);
    node.get("custom_attributes")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl Messaging for ChatwootClient {
    async fn contact_attrs(&self, contact_id: i64) -> Result<Map<String, Value>, PlatformError> {
        let payload = self.get_json(&format!("contacts/{contact_id}")).await?;
        Ok(extract_custom_attrs(&payload))
    }

    async fn merge_contact_attrs(&self, contact_id: i64, patch: &AttrPatch) -> bool {
        if patch.is_empty() {
            return true;
        }
        // Read-merge-write: the platform's PUT replaces the attribute map.
        let mut merged = match self.contact_attrs(contact_id).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(contact_id, error = %e, "contact read before merge failed");
                Map::new()
            }
        };
        for (k, v) in &patch.0 {
            merged.insert(k.clone(), v.clone());
        }
        let result = self
            .send_json(
                reqwest::Method::PUT,
                &format!("contacts/{contact_id}"),
                &json!({ "custom_attributes": merged }),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(contact_id, error = %e, "contact attribute write failed");
            return false;
        }
        true
    }

    async fn conversation_attrs(
        &self,
        conversation_id: i64,
    ) -> Result<Map<String, Value>, PlatformError> {
        let payload = self
            .get_json(&format!("conversations/{conversation_id}"))
            .await?;
        Ok(extract_custom_attrs(&payload))
    }

    async fn merge_conversation_attrs(&self, conversation_id: i64, patch: &AttrPatch) -> bool {
        if patch.is_empty() {
            return true;
        }
        let mut merged = match self.conversation_attrs(conversation_id).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "conversation read before merge failed");
                Map::new()
            }
        };
        for (k, v) in &patch.0 {
            merged.insert(k.clone(), v.clone());
        }
        let result = self
            .send_json(
                reqwest::Method::POST,
                &format!("conversations/{conversation_id}/custom_attributes"),
                &json!({ "custom_attributes": merged }),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(conversation_id, error = %e, "conversation attribute write failed");
            return false;
        }
        true
    }

    async fn send_text(
        &self,
        conversation_id: i64,
        body: &str,
        private: bool,
    ) -> Result<(), PlatformError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("conversations/{conversation_id}/messages"),
            &json!({
                "content": body,
                "message_type": "outgoing",
                "private": private,
            }),
        )
        .await?;
        Ok(())
    }

    async fn send_menu(
        &self,
        conversation_id: i64,
        body: &str,
        options: &[MenuOption],
    ) -> Result<(), PlatformError> {
        let (body, options) = menu::clamp(body, options);
        let items: Vec<Value> = options
            .iter()
            .map(|o| json!({ "title": o.title, "value": o.value }))
            .collect();
        self.send_json(
            reqwest::Method::POST,
            &format!("conversations/{conversation_id}/messages"),
            &json!({
                "content": body,
                "content_type": "input_select",
                "content_attributes": { "items": items },
                "message_type": "outgoing",
                "private": false,
            }),
        )
        .await?;
        Ok(())
    }

    async fn add_labels(&self, conversation_id: i64, labels: &[&str]) -> bool {
        // Labels POST replaces the set, so merge with what is there.
        let current: Vec<String> = match self
            .get_json(&format!("conversations/{conversation_id}/labels"))
            .await
        {
            Ok(payload) => payload
                .get("payload")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "label read failed");
                Vec::new()
            }
        };

        let mut merged = current;
        for label in labels {
            if !merged.iter().any(|l| l == label) {
                merged.push((*label).to_string());
            }
        }
        merged.sort();

        let result = self
            .send_json(
                reqwest::Method::POST,
                &format!("conversations/{conversation_id}/labels"),
                &json!({ "labels": merged }),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(conversation_id, error = %e, "label write failed");
            return false;
        }
        true
    }

    async fn assign(&self, conversation_id: i64, agent_id: i64) -> bool {
        let result = self
            .send_json(
                reqwest::Method::POST,
                &format!("conversations/{conversation_id}/assignments"),
                &json!({ "assignee_id": agent_id }),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(conversation_id, agent_id, error = %e, "assignment failed");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> ChatwootClient {
        // Unroutable address: requests fail fast without touching the network.
        ChatwootClient::new(
            "http://127.0.0.1:9".to_string(),
            7,
            SecretString::from("token"),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[test]
    fn api_url_includes_account() {
        let c = client();
        assert_eq!(
            c.api_url("conversations/42/messages"),
            "http://127.0.0.1:9/api/v1/accounts/7/conversations/42/messages"
        );
    }

    #[test]
    fn extract_custom_attrs_handles_both_shapes() {
        let wrapped = json!({"payload": {"custom_attributes": {"a": 1}}});
        let bare = json!({"custom_attributes": {"b": 2}});
        assert_eq!(extract_custom_attrs(&wrapped).get("a"), Some(&json!(1)));
        assert_eq!(extract_custom_attrs(&bare).get("b"), Some(&json!(2)));
        assert!(extract_custom_attrs(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn attribute_write_failure_returns_false() {
        let c = client();
        let patch = AttrPatch::new().set_str("pending_intent", "idle");
        assert!(!c.merge_conversation_attrs(1, &patch).await);
        assert!(!c.merge_contact_attrs(1, &patch).await);
    }

    #[tokio::test]
    async fn empty_patch_is_a_no_op() {
        let c = client();
        assert!(c.merge_conversation_attrs(1, &AttrPatch::new()).await);
    }

    #[tokio::test]
    async fn send_text_surfaces_transport_error() {
        let c = client();
        let err = c.send_text(1, "hallo", false).await.unwrap_err();
        match err {
            PlatformError::RequestFailed { endpoint, .. } => {
                assert_eq!(endpoint, "conversations/1/messages")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn label_and_assignment_failures_are_non_fatal() {
        let c = client();
        assert!(!c.add_labels(1, &["status:booked"]).await);
        assert!(!c.assign(1, 99).await);
    }
}
