//! Error types for sensorflux
//!
//! Every long-lived loop handles errors at the boundary where they occur;
//! the only errors allowed to terminate the process are startup failures
//! (initial broker connection, setup).

use thiserror::Error;

/// Result type alias for sensorflux operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the ingestion and replication paths
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Initial connection to the MQTT broker failed (fatal at startup)
    #[error("transport connect error: {0}")]
    TransportConnect(String),

    /// Message payload could not be decoded (dropped, never retried)
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Error from the primary relational store
    #[error("primary store error: {0}")]
    PrimaryStore(String),

    /// Error from the secondary document store
    #[error("secondary store error: {0}")]
    SecondaryStore(String),

    /// IO error (critical-event file and friends)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport connect error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportConnect(msg.into())
    }

    /// Create a malformed-message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create a primary-store error
    pub fn primary(msg: impl Into<String>) -> Self {
        Self::PrimaryStore(msg.into())
    }

    /// Create a secondary-store error
    pub fn secondary(msg: impl Into<String>) -> Self {
        Self::SecondaryStore(msg.into())
    }

    /// Check if this error is recoverable by the owning loop.
    ///
    /// Store errors are retried on the next message or poll cycle; malformed
    /// messages are dropped. Only config and startup transport errors are
    /// treated as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PrimaryStore(_) | Self::SecondaryStore(_) | Self::Io(_)
        )
    }
}
