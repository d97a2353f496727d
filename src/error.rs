//! Error types for the session core.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Marker the control endpoint embeds in errors when this instance's
/// registration has been revoked. Matched by substring, as the endpoint
/// reports it inside a free-form error message.
pub const INACTIVE_INSTANCE_MARKER: &str = "InactiveInstanceException";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    /// The connection terminated with a clean close handshake. This is the
    /// normal end of a connection, not a fault.
    #[error("connection closed")]
    EndOfStream,

    #[error("connection closed unexpectedly: code {code}, reason: {reason}")]
    UnexpectedClose { code: u16, reason: String },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Error reported by the control endpoint itself, carried verbatim.
    #[error("control endpoint error: {0}")]
    Server(String),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("task engine error: {0}")]
    Engine(String),
}

impl SessionError {
    /// True when the error is the clean end of a connection. The reconnect
    /// loop skips the backoff delay for these.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, SessionError::EndOfStream)
    }

    /// True when the control endpoint signalled that this instance's
    /// registration is no longer valid.
    pub fn is_inactive_instance(&self) -> bool {
        self.to_string().contains(INACTIVE_INSTANCE_MARKER)
    }
}
