//! Error types for the chat core.
//!
//! Session errors (handshake, authentication, state transitions) and send
//! errors (local validation of outgoing messages). Transport failures never
//! surface here directly; the session absorbs them and reconnects.

use crewchat_proto::{Command, ProtocolError};
use thiserror::Error;

use crate::{message::LocalId, session::SessionState};

/// Errors produced by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No token, or the server rejected the handshake
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport could not be opened or the handshake timed out
    #[error("connection failed: {0}")]
    Connect(String),

    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when the error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Frame not valid in the current state
    #[error("unexpected {command} frame in state {state:?}")]
    UnexpectedFrame {
        /// Current state when the frame arrived
        state: SessionState,
        /// Command of the unexpected frame
        command: Command,
    },

    /// Frame encoding or payload error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Returns true if a later attempt may succeed without user action.
    ///
    /// Authentication failures need a new token; state and protocol errors
    /// indicate a caller or peer bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    /// Whether this is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors produced when sending or retrying a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Text is empty or whitespace only
    #[error("message is empty")]
    Empty,

    /// No message with this local id
    #[error("unknown message {0}")]
    UnknownMessage(LocalId),

    /// Retry requested for a message that has not failed
    #[error("message {0} has not failed")]
    NotFailed(LocalId),
}
