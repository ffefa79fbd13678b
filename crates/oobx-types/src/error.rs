//! Shared error types for the oobx system.

use thiserror::Error;

/// Top-level error type for out-of-band processing.
#[derive(Error, Debug)]
pub enum OobError {
    /// The invitation is malformed or under-specified.
    #[error("Invalid invitation: {0}")]
    InvalidInvitation(String),

    /// No supported handshake protocol matched, or the delegated
    /// connection establishment failed.
    #[error("Handshake failed using protocols [{}]: {reason}", protocols.join(", "))]
    HandshakeFailed {
        /// The protocol identifiers that were considered.
        protocols: Vec<String>,
        /// Why establishment failed.
        reason: String,
    },

    /// Processing an inbound reuse, reuse-accept, or problem-report failed.
    #[error("Reuse handling failed for invitation {invitation_id} (message {message_id}): {reason}")]
    ReuseHandlingFailed {
        /// The invitation the message was correlated to.
        invitation_id: String,
        /// The reuse message id carried in the thread.
        message_id: String,
        /// Underlying cause.
        reason: String,
    },

    /// Reuse was rejected and the configuration forbids falling back to a handshake.
    #[error("Connection reuse rejected for invitation {invitation_id} (connection {connection_id})")]
    ReuseRejected {
        /// The invitation id.
        invitation_id: String,
        /// The connection that was offered for reuse.
        connection_id: String,
    },

    /// An attached request is not a well-formed application message.
    #[error("Malformed attachment: {0}")]
    MalformedAttachment(String),

    /// A record was not found in storage.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A guarded write found the record changed since it was read.
    #[error("Record changed concurrently: {0}")]
    StateConflict(String),

    /// The record store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Sending an outbound message failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Key creation or lookup failed.
    #[error("Key management error: {0}")]
    KeyManagement(String),

    /// DID resolution failed.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OobError {
    fn from(e: serde_json::Error) -> Self {
        OobError::Serialization(e.to_string())
    }
}

/// Alias for Result with OobError.
pub type OobResult<T> = Result<T, OobError>;
