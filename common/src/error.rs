use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} `{value}` is not a valid topic segment")]
    InvalidSegment { field: &'static str, value: String },
}

/// Failures reported by the link and session backends.
///
/// None of these are fatal to the supervisor: they are logged and the
/// operation is retried on its cooldown.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network link unavailable: {0}")]
    Link(String),
    #[error("mqtt session not connected")]
    NotConnected,
    #[error("mqtt connect failed: {0}")]
    Connect(String),
    #[error("mqtt publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("mqtt subscribe to `{topic}` failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("maintenance service failed to start: {0}")]
    Maintenance(String),
}
