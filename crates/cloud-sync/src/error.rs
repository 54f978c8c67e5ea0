//! Error types for the cloud sync crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for cloud sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures of a single HTTP round-trip.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// No response within the request timeout
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// DNS, connect or I/O failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Non-2xx status, with the body decoded when it was JSON
    #[error("HTTP status {status}")]
    Status {
        status: u16,
        body: Option<serde_json::Value>,
    },

    /// 2xx status whose body was not JSON
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    /// The request could not be built (bad header value, bad URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Failures of the durable credential store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Storage is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the session and sync engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The server did not answer within the timeout
    #[error("Request timed out")]
    Timeout,

    /// DNS or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// No credential is held; the request was never sent
    #[error("No credential. Please sign in first.")]
    NoCredential,

    /// The server rejected the credential. Recovered inside the pipeline;
    /// only returned to callers that opted out of authentication.
    #[error("Session expired")]
    AuthExpired,

    /// Credential exchange failed; the user has to sign in again
    #[error("Sign-in failed: {0}")]
    AuthExchangeFailed(String),

    /// The server answered with a business code other than 200
    #[error("Server rejected request ({code}): {message}")]
    ServerRejected { code: i64, message: String },

    /// The response could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A save is already in flight
    #[error("A save is already in progress")]
    SaveInProgress,

    /// Offline earnings for the loaded game were not accepted or discarded yet
    #[error("Offline earnings must be accepted or discarded before saving")]
    OfflineEarningsUnresolved,

    /// Local configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable storage problem
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Create a server rejection from a business code and message
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self::ServerRejected {
            code,
            message: message.into(),
        }
    }

    /// Create a malformed-response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a credential exchange failure
    pub fn exchange_failed(message: impl Into<String>) -> Self {
        Self::AuthExchangeFailed(message.into())
    }

    /// Business code if this is a server rejection.
    pub fn server_code(&self) -> Option<i64> {
        match self {
            Self::ServerRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a save failing with this error counts toward the circuit breaker.
    ///
    /// Expired sessions are recovered by the pipeline. A rejected overlap or
    /// an unresolved reward never reached the server.
    pub fn counts_toward_circuit(&self) -> bool {
        !matches!(
            self,
            Self::AuthExpired | Self::SaveInProgress | Self::OfflineEarningsUnresolved
        )
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::Timeout,
            TransportError::Connection(message) => Self::Transport(message),
            TransportError::Status { status, body } => {
                let message = body
                    .as_ref()
                    .and_then(|value| value.get("message"))
                    .and_then(|value| value.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP status {}", status));
                Self::rejected(i64::from(status), message)
            }
            TransportError::InvalidBody(message) => Self::MalformedResponse(message),
            TransportError::InvalidRequest(message) => Self::Config(message),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
