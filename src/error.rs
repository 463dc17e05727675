//! Error types for the planning poker client.

use thiserror::Error;

/// Errors that can occur when using the planning poker client.
#[derive(Debug, Error)]
pub enum PokerError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active channel, but no
    /// connection has been opened (or it was torn down).
    #[error("not connected to server")]
    NotConnected,

    /// A game action was sent over the channel for a game the session is not
    /// (or no longer) subscribed to.
    #[error("not subscribed to a game")]
    NotSubscribed,

    /// The server answered an HTTP request with a non-success status.
    #[error("server returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error text from the server's `{"error": ...}` body, if any.
        message: String,
    },

    /// An HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// The session credential was rejected by the server.
    #[error("session is not authorized")]
    Unauthorized,

    /// A card value cannot be voted with.
    #[error("invalid card: {0:?}")]
    InvalidCard(String),

    /// A configured URL could not be parsed or used.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The mirror was torn down; no further mutations are accepted.
    #[error("game mirror is closed")]
    MirrorClosed,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// A required environment variable is missing or malformed.
    #[error("invalid environment variable `{var}`")]
    InvalidEnvVar {
        /// Name of the variable.
        var: &'static str,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PokerError {
    /// Returns `true` for failures that retrying the same request cannot fix.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// A specialized [`Result`] type for planning poker client operations.
pub type Result<T> = std::result::Result<T, PokerError>;
