//! Error types for the HTSP protocol and client.

use thiserror::Error;

/// Wire-level errors raised while encoding or decoding HTSMSG frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame body is larger than the accepted maximum.
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    /// Not enough bytes left for a field header or payload.
    #[error("Incomplete field: expected {expected} bytes, got {actual}")]
    IncompleteField { expected: usize, actual: usize },

    /// Field type byte is not one of MAP/S64/STR/BIN/LIST.
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u8),

    /// S64 payload longer than eight bytes.
    #[error("Invalid S64 length: {0} bytes")]
    InvalidIntegerLength(usize),

    /// Nested maps/lists deeper than the decoder allows.
    #[error("Nesting too deep (max: {0})")]
    NestingTooDeep(usize),

    /// A field required by the message contract is absent.
    #[error("Missing field '{field}' in {context}")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },

    /// A field is present but its value is unusable.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    pub(crate) fn incomplete(expected: usize, actual: usize) -> Self {
        ProtocolError::IncompleteField { expected, actual }
    }

    pub fn missing(field: &'static str, context: &'static str) -> Self {
        ProtocolError::MissingField { field, context }
    }
}

/// Client-side errors returned by session, tracker and demuxer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// TCP connect or greeting failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed (locally aborted or by the server).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation attempted while no connection is open.
    #[error("Not connected")]
    NotConnected,

    /// No reply arrived in time.
    #[error("Request timed out")]
    Timeout,

    /// Server answered with an `error` field.
    #[error("Server error: {0}")]
    ServerError(String),

    /// Server answered with a non-zero `noaccess` field.
    #[error("Access denied")]
    AccessDenied,

    /// Too many messages buffered while waiting for a reply.
    #[error("Server unresponsive: {0} messages queued while awaiting reply")]
    QueueOverflow(usize),

    /// Malformed frame or message.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

impl ClientError {
    /// Returns true if the error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed(_)
                | ClientError::ConnectionClosed
                | ClientError::NotConnected
                | ClientError::Io(_)
        )
    }
}
