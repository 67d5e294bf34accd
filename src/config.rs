//! Environment-driven configuration.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the messaging platform, e.g. `https://app.chatwoot.example`.
    pub platform_base_url: String,
    /// Account id on the messaging platform.
    pub platform_account_id: i64,
    /// API access token for the platform.
    pub platform_api_token: SecretString,
    /// HMAC secret for inbound platform webhooks. Absent → verification is
    /// skipped (fail-open) and logged.
    pub platform_webhook_secret: Option<SecretString>,

    /// Agent id that receives handed-off conversations.
    pub handoff_agent_id: Option<i64>,

    /// OpenAI-compatible API key for the text-analysis collaborator.
    pub analysis_api_key: Option<SecretString>,
    /// Model name for analysis requests.
    pub analysis_model: String,

    /// Base URL of the calendar service. Absent → fallback slots only.
    pub calendar_base_url: Option<String>,
    /// Calendar id used for free/busy queries and event creation.
    pub calendar_id: String,

    /// Base URL of the payment service. Absent → paid bookings confirm
    /// immediately without a checkout link.
    pub payment_base_url: Option<String>,
    pub payment_api_key: Option<SecretString>,
    /// HMAC secret for inbound payment webhooks.
    pub payment_webhook_secret: Option<SecretString>,
    /// Prefix for generated order ids.
    pub order_prefix: String,

    /// Socket address the HTTP server binds to.
    pub bind_addr: String,
    /// Timeout applied to every outbound collaborator call.
    pub request_timeout: Duration,
    /// Business-timezone offset from UTC, in minutes.
    pub tz_offset_minutes: i32,
}

impl AppConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let platform_base_url = require("TUTORBOT_PLATFORM_URL")?
            .trim_end_matches('/')
            .to_string();
        let platform_account_id = parse_i64("TUTORBOT_PLATFORM_ACCOUNT_ID")?;
        let platform_api_token = SecretString::from(require("TUTORBOT_PLATFORM_TOKEN")?);

        Ok(Self {
            platform_base_url,
            platform_account_id,
            platform_api_token,
            platform_webhook_secret: optional("TUTORBOT_WEBHOOK_SECRET").map(SecretString::from),
            handoff_agent_id: optional_i64("TUTORBOT_HANDOFF_AGENT_ID")?,
            analysis_api_key: optional("OPENAI_API_KEY").map(SecretString::from),
            analysis_model: optional("TUTORBOT_ANALYSIS_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            calendar_base_url: optional("TUTORBOT_CALENDAR_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            calendar_id: optional("TUTORBOT_CALENDAR_ID").unwrap_or_else(|| "primary".to_string()),
            payment_base_url: optional("TUTORBOT_PAYMENT_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            payment_api_key: optional("TUTORBOT_PAYMENT_KEY").map(SecretString::from),
            payment_webhook_secret: optional("TUTORBOT_PAYMENT_WEBHOOK_SECRET")
                .map(SecretString::from),
            order_prefix: optional("TUTORBOT_ORDER_PREFIX").unwrap_or_else(|| "TB".to_string()),
            bind_addr: optional("TUTORBOT_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            request_timeout: Duration::from_secs(optional_i64("TUTORBOT_TIMEOUT_SECS")?
                .unwrap_or(10) as u64),
            tz_offset_minutes: optional_i64("TUTORBOT_TZ_OFFSET_MINUTES")?
                .map(|v| v as i32)
                .unwrap_or(120),
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_i64(key: &str) -> Result<i64, ConfigError> {
    require(key)?.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: "expected an integer".to_string(),
    })
}

fn optional_i64(key: &str) -> Result<Option<i64>, ConfigError> {
    match optional(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: "expected an integer".to_string(),
            }),
    }
}
