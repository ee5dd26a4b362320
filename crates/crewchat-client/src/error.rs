//! Client error types.

use crewchat_core::{RoomId, SendError, SessionError, SessionState};
use thiserror::Error;

/// Errors returned by [`crate::ChatClient::handle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Session state machine rejected the operation
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Message could not be sent or retried
    #[error(transparent)]
    Send(#[from] SendError),

    /// Sending requires a Connected session
    #[error("not connected (session is {state:?})")]
    NotConnected {
        /// Session state at the time of the call
        state: SessionState,
    },

    /// Only one room can be open at a time
    #[error("room {room_id} is already open")]
    RoomAlreadyOpen {
        /// The room currently open
        room_id: RoomId,
    },

    /// Operation needs an open room
    #[error("no room is open")]
    NoRoomOpen,
}

impl ClientError {
    /// Whether this error means the token is missing or rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Session(err) if err.is_auth())
    }
}

/// Failure of a one-shot REST request (history, profile, room list).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 401/403 or no token: the user must sign in again
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other failure
    #[error("request failed: {0}")]
    Failed(String),
}

impl FetchError {
    /// Whether the failure requires a new token.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}
