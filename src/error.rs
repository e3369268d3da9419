//! Error types for the RPC bridge

use thiserror::Error;

/// Main error type for the RPC bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The program named by `argv[0]` could not be resolved
    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    /// The subprocess could not be started
    #[error("Failed to spawn subprocess: {0}")]
    Spawn(String),

    /// Writing the prompt line to the subprocess failed
    #[error("Failed to write to subprocess: {0}")]
    Write(String),

    /// A call is already pending on this client
    #[error("Client {0} already has a call in flight")]
    AlreadyBusy(String),

    /// No resolution arrived within the effective timeout
    #[error("Subprocess call timed out after {timeout_ms} ms")]
    Timeout {
        /// Effective timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// The pending call lost its resolver without receiving a result
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid configuration or call arguments
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create a program not found error
    pub fn program_not_found(name: impl Into<String>) -> Self {
        Self::ProgramNotFound(name.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a write error
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Create an already busy error
    pub fn already_busy(client_id: impl std::fmt::Display) -> Self {
        Self::AlreadyBusy(client_id.to_string())
    }

    /// Create a timeout error for the given effective cap
    #[must_use]
    pub fn timeout(cap: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(cap.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error is an `AlreadyBusy` rejection
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::AlreadyBusy(_))
    }

    /// Whether this error is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
