//! Error types for Live Courier.

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Rule sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors from the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Locally rejected input, surfaced before any network call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("active template is empty")]
    EmptyTemplate,

    #[error("replacement rule key must not be empty")]
    EmptyRuleKey,

    #[error("message content is empty")]
    EmptyMessage,

    #[error("no template at index {0}")]
    TemplateIndex(usize),
}

/// Failures on the send path. A platform *rejection* is not an error — it is
/// reported as an outcome so the loop can keep running.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("session credential missing; sign in on the host platform first")]
    MissingCredential,

    #[error("room resolution failed: {0}")]
    RoomResolution(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),
}

/// Remote rule document fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("failed to decode rule document: {0}")]
    Decode(String),
}

/// Content classifier errors. Treated as "no flags found" by the retrier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
