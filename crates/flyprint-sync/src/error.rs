//! # Sync Error Types
//!
//! Error types for cloud synchronization.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │      Auth       │  │      Transport          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  AuthFailed     │  │  ConnectionFailed       │ │
//! │  │  InvalidUrl     │  │  AuthRejected   │  │  Disconnected, Timeout  │ │
//! │  │  CloudDisabled  │  │                 │  │  Http, WebSocketError   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Protocol     │  │       Job       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidMessage │  │  DownloadFailed │  │  QueueFull              │ │
//! │  │  Unexpected     │  │  Submission     │  │  ShuttingDown           │ │
//! │  │  Status         │  │  Backend        │  │  ChannelError           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! Loop-internal failures (reconnects, missed heartbeats) are absorbed and
//! logged by their owner. Job failures end up in a `job_update` report.
//! Nothing here is allowed to take the process down.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load a config or device file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save a config or device file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Cloud synchronization is switched off in the configuration.
    #[error("Cloud service is disabled")]
    CloudDisabled,

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// Token request could not be completed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Auth server answered with a non-success status.
    #[error("Token request rejected with status {status}: {body}")]
    AuthRejected { status: u16, body: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to reach the remote side.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Realtime connection dropped.
    #[error("Disconnected from cloud")]
    Disconnected,

    /// Operation timed out.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// HTTP request failed below the status-code level.
    #[error("HTTP error: {0}")]
    Http(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Invalid message received.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Cloud answered with a status the call does not accept.
    #[error("Unexpected HTTP status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    // =========================================================================
    // Job Errors
    // =========================================================================
    /// Artifact download failed.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The print backend refused the job.
    #[error("{0}")]
    SubmissionFailed(String),

    /// Any other print backend failure.
    #[error("Print backend error: {0}")]
    Backend(String),

    /// Local file I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Component is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Operation needs a started, registered agent.
    #[error("Edge agent is not running")]
    NotRunning,

    /// Outbound queue is at capacity.
    #[error("Outbound queue full ({0} messages)")]
    QueueFull(usize),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<flyprint_core::CoreError> for SyncError {
    fn from(err: flyprint_core::CoreError) -> Self {
        SyncError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            SyncError::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the owning loop may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
                | SyncError::Http(_)
                | SyncError::AuthFailed(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::CloudDisabled
        )
    }

    /// Returns true for token acquisition failures.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::AuthFailed(_) | SyncError::AuthRejected { .. })
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidMessage(_)
                | SyncError::SerializationFailed(_)
                | SyncError::DeserializationFailed(_)
                | SyncError::UnexpectedStatus { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(10).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::SubmissionFailed("printer missing".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::CloudDisabled.is_config_error());
        assert!(SyncError::AuthRejected {
            status: 401,
            body: "bad client".into()
        }
        .is_auth_error());
        assert!(SyncError::InvalidMessage("missing type".into()).is_protocol_error());
    }

    #[test]
    fn test_submission_message_is_passed_through() {
        let err = SyncError::SubmissionFailed("printer HP1 not found".into());
        assert_eq!(err.to_string(), "printer HP1 not found");
    }

    #[test]
    fn test_tungstenite_close_maps_to_disconnected() {
        let err: SyncError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, SyncError::Disconnected));
    }
}
