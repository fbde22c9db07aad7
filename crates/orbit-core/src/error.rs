//! Error types for Orbit Core

use thiserror::Error;

/// Main error type for Orbit operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("ACP protocol error: {0}")]
    Acp(#[from] AcpError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// ACP-specific errors
#[derive(Error, Debug)]
pub enum AcpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

/// Provider adapter and registry errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not found: {0}")]
    NotFound(String),

    #[error("Provider already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Provider not started: {0}")]
    NotStarted(String),

    #[error("Provider disabled: {0}")]
    Disabled(String),

    #[error("Capability not supported: {0}")]
    CapabilityNotSupported(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to start provider: {0}")]
    StartFailed(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

/// Relay router errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Handshake not completed")]
    HandshakeIncomplete,

    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    #[error("Undeliverable message for thread {thread_id}")]
    Undeliverable { thread_id: String },

    #[error("Malformed relay frame: {0}")]
    MalformedFrame(String),
}

/// Validation failure reporting every violated field.
///
/// Collected at the normalization boundary so callers see all problems in
/// one pass instead of fixing fields one at a time.
#[derive(Error, Debug, Clone)]
#[error("validation failed: {}", self.describe())]
pub struct ValidationFailure {
    pub errors: Vec<FieldError>,
}

/// A single violated field with the reason
#[derive(Debug, Clone)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl ValidationFailure {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return `Ok(())` when no field was violated
    pub fn into_result(self) -> std::result::Result<(), ValidationFailure> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn describe(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for ValidationFailure {
    fn default() -> Self {
        Self::new()
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
