//! Client events and actions.

use crewchat_core::{LocalId, Profile, RoomId, SessionError, SessionState};
use crewchat_proto::{Frame, payloads::ChatMessageDto};

use crate::error::FetchError;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting transport lifecycle and decoded frames
/// - Completing history requests the client asked for
/// - Driving time forward via ticks
/// - Forwarding user intents (open, send, retry, close)
///
/// Generic over `I` (Instant type) to support both production
/// (`std::time::Instant`) and simulation (virtual) clocks.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// User opens a room view.
    OpenRoom(RoomId),

    /// User closes the room view.
    CloseRoom,

    /// User submits text.
    Send(String),

    /// User retries a failed message.
    Retry(LocalId),

    /// Current user's profile became known.
    ProfileLoaded(Profile),

    /// Transport requested by `OpenTransport` is open.
    TransportOpened,

    /// Transport closed or failed to open.
    TransportClosed {
        /// Human-readable cause
        reason: String,
    },

    /// Server refused the transport with 401/403.
    TransportRejected {
        /// Human-readable cause
        reason: String,
    },

    /// STOMP frame received from the server.
    FrameReceived(Frame),

    /// Bare EOL heart-beat received from the server.
    HeartBeatReceived,

    /// Result of a `FetchHistory` action.
    HistoryLoaded {
        /// Id from the matching `FetchHistory`
        request_id: u64,
        /// Messages newest first, or the failure
        result: Result<Vec<ChatMessageDto>, FetchError>,
    },

    /// Time tick for timeout processing.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open a WebSocket transport.
    OpenTransport {
        /// Endpoint URL
        url: String,
        /// Upgrade request headers
        headers: Vec<(String, String)>,
    },

    /// Send a STOMP frame.
    SendFrame(Frame),

    /// Send a bare EOL heart-beat.
    SendHeartBeat,

    /// Close the transport.
    CloseTransport,

    /// Load history for a room over HTTP and answer with `HistoryLoaded`.
    FetchHistory {
        /// Correlates the answer
        request_id: u64,
        /// Room to load
        room_id: RoomId,
    },

    /// Abandon an in-flight history request. A late answer is ignored anyway.
    CancelHistory {
        /// Request to abandon
        request_id: u64,
    },

    /// Connection state changed.
    StateChanged(SessionState),

    /// Subscription to the room is live.
    RoomOpened {
        /// Subscribed room
        room_id: RoomId,
        /// True after a reconnect
        resumed: bool,
    },

    /// The open failed; no room is open.
    OpenFailed(SessionError),

    /// The session ended on its own; messages stay readable until close.
    SessionEnded(SessionError),

    /// The ordered message list changed.
    MessagesChanged,

    /// A send got no echo within the timeout.
    DeliveryFailed(LocalId),

    /// History could not be loaded.
    HistoryFailed(FetchError),

    /// Log message for debugging.
    Log {
        /// Log message.
        message: String,
    },
}
