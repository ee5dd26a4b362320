//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding STOMP frames and payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds [`crate::Frame::MAX_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Encoded or received size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Command line is not a STOMP 1.2 command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// Header line without a `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Header contains an undefined escape sequence.
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    /// Header value cannot be represented on the wire for this command.
    ///
    /// `CONNECT` and `CONNECTED` frames are not escaped, so their headers must
    /// not contain line breaks or colons in names.
    #[error("header {name:?} cannot be encoded unescaped")]
    UnencodableHeader {
        /// Offending header name
        name: String,
    },

    /// `content-length` is not a valid decimal length.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Frame ended before its body terminator.
    #[error("frame truncated: expected {expected} body bytes, got {actual}")]
    FrameTruncated {
        /// Body bytes the frame claims
        expected: usize,
        /// Body bytes actually present
        actual: usize,
    },

    /// Frame has no NUL terminator.
    #[error("frame is missing its NUL terminator")]
    MissingTerminator,

    /// Frame is not valid UTF-8 where text is required.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// `heart-beat` header is not two comma-separated integers.
    #[error("invalid heart-beat header: {0:?}")]
    InvalidHeartBeat(String),

    /// JSON body failed to (de)serialize.
    #[error("json payload error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
