//! Error types for the tutoring bot.

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Flow error: {0}")]
    Flow(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Messaging-platform client errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Platform returned {status} for {endpoint}: {body}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected payload from {endpoint}: {reason}")]
    BadPayload { endpoint: String, reason: String },
}

/// Text-analysis collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis request failed: {0}")]
    RequestFailed(String),

    #[error("Analysis returned an unusable response: {0}")]
    BadResponse(String),

    #[error("No analysis backend configured")]
    NotConfigured,
}

/// Calendar collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Free/busy query failed: {0}")]
    FreeBusy(String),

    #[error("Event creation failed: {0}")]
    CreateEvent(String),
}

/// Payment collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Checkout creation failed: {0}")]
    Checkout(String),

    #[error("Invalid payment event: {0}")]
    InvalidEvent(String),
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
