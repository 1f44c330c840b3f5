//! Error types for the sync client.

use std::time::Duration;

/// Failure talking to the store.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("response envelope carried no data")]
    MissingData,
}

/// Errors surfaced by the sync coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("full sync failed: {0}")]
    FullSync(Box<SyncError>),

    #[error("a sync cycle is already running")]
    Busy,

    #[error("engine error: {0}")]
    Engine(#[from] ferry_engine::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("write to {entity} rejected: {reason}")]
    Rejected { entity: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sync_wraps_cause() {
        let err = SyncError::FullSync(Box::new(SyncError::Transport(TransportError::Timeout(
            Duration::from_secs(30),
        ))));

        assert_eq!(
            err.to_string(),
            "full sync failed: transport error: request timed out after 30s"
        );
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            name: "FERRY_BATCH_SIZE",
            value: "lots".into(),
        };
        assert_eq!(err.to_string(), "invalid value for FERRY_BATCH_SIZE: lots");
    }
}
