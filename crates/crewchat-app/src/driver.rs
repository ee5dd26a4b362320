//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from specific I/O
//! implementations. The terminal client drives a WebSocket and the REST API;
//! the simulation harness drives an in-process broker on a virtual clock. The
//! generic [`crate::Runtime`] handles all orchestration.

use std::{future::Future, time::Duration};

use crewchat_client::{FetchError, LocalId, Profile, RoomId};
use crewchat_proto::{Frame, payloads::ChatMessageDto};

use crate::ChatView;

/// User intents entered while a room is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Submit text.
    Send(String),
    /// Retry a failed message.
    Retry(LocalId),
    /// Leave the room view.
    Close,
}

/// Inputs a driver hands to the runtime.
///
/// Transport failures are events, not driver errors: they are absorbed by the
/// session (reconnect) and only show up as connection state.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// Transport requested with `open_transport` is up.
    TransportOpened,
    /// Transport closed or could not be opened.
    TransportClosed {
        /// Human-readable cause
        reason: String,
    },
    /// The server refused the upgrade with 401/403.
    TransportRejected {
        /// Human-readable cause
        reason: String,
    },
    /// A STOMP frame arrived.
    Frame(Frame),
    /// A heart-beat arrived.
    HeartBeat,
    /// Answer to `fetch_history`.
    HistoryLoaded {
        /// Id passed to `fetch_history`
        request_id: u64,
        /// Messages newest first, or the failure
        result: Result<Vec<ChatMessageDto>, FetchError>,
    },
    /// The current user's profile arrived.
    ProfileLoaded(Profile),
    /// The profile request failed.
    ProfileFailed(FetchError),
    /// User intent.
    Intent(Intent),
}

/// Abstracts I/O operations for the runtime.
///
/// Implementations provide platform-specific I/O while the generic
/// [`Runtime`](crate::Runtime) handles orchestration logic. This ensures the
/// same orchestration code runs in the terminal client and in simulation.
///
/// Operations that complete asynchronously (transport open, history fetch)
/// report their outcome later through [`Driver::next_event`].
pub trait Driver: Send {
    /// Fatal, platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Start opening a transport. Completion is reported as
    /// `TransportOpened`, `TransportClosed` or `TransportRejected`.
    fn open_transport(
        &mut self,
        url: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a frame over the open transport.
    ///
    /// A send on a dead transport is not an error; the loss surfaces as
    /// `TransportClosed`.
    fn send_frame(&mut self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a heart-beat over the open transport.
    fn send_heartbeat(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Release the transport. No events for it are delivered afterwards.
    fn close_transport(&mut self) -> impl Future<Output = ()> + Send;

    /// Start loading history. The answer arrives as `HistoryLoaded`.
    fn fetch_history(&mut self, request_id: u64, room_id: RoomId);

    /// Abandon a history request.
    fn cancel_history(&mut self, request_id: u64);

    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once `timeout` has elapsed without an event. With no
    /// timeout, waits until something happens.
    ///
    /// # Errors
    ///
    /// Returns an error if the input source is gone.
    fn next_event(
        &mut self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Option<DriverEvent>, Self::Error>> + Send;

    /// Render the view.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    fn render(&mut self, view: &ChatView) -> Result<(), Self::Error>;
}
