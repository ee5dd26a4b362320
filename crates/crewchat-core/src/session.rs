//! Session layer state machine.
//!
//! Manages the STOMP session of one open room: transport lifecycle, the
//! CONNECT/CONNECTED handshake, the room subscription, heart-beats, automatic
//! reconnect and teardown. Uses the action pattern: methods take time as input
//! and return actions for the driver to execute.
//!
//! # State Machine
//!
//! ```text
//!                open              CONNECTED
//! ┌──────────────┐ ───> ┌────────────┐ ───> ┌───────────┐
//! │ Disconnected │      │ Connecting │      │ Connected │
//! └──────────────┘ <─── └────────────┘      └───────────┘
//!        ^   ERROR / timeout / closed            │ drop
//!        │                                       v
//!        │ close, auth error, retry cap   ┌──────────────┐
//!        └─────────────────────────────── │ Reconnecting │ ──> Connected
//!                                         └──────────────┘  CONNECTED
//! ```
//!
//! # Invariants
//!
//! - Single Cancellation Point: after [`Session::close`] no action other than
//!   the teardown it returns is ever produced until the next `open`.
//! - Resubscription: every successful handshake subscribes to the same room
//!   the session was opened for.
//! - Initial failures are terminal for that `open`: the session never retries
//!   before it has been connected once.

use std::time::Duration;

use crewchat_proto::{
    Command, Frame, HeartBeat, Negotiated,
    destination::{room_send, room_topic},
    payloads::OutgoingMessage,
};

use crate::{auth::AuthContext, env::Moment, error::SessionError, room::RoomId};

/// Time allowed to open the transport and complete CONNECT/CONNECTED.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between a drop and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Heart-beat offer sent with CONNECT.
pub const DEFAULT_HEART_BEAT: HeartBeat = HeartBeat { send_ms: 10_000, recv_ms: 10_000 };

/// Missed incoming heart-beat intervals tolerated before the link is dropped.
pub const IDLE_TOLERANCE: u32 = 2;

/// Public session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport, no room
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Handshake complete and subscribed
    Connected,
    /// Lost an established connection, retrying
    Reconnecting {
        /// 1-based attempt counter, reset on success
        attempt: u32,
    },
}

impl SessionState {
    /// Whether publishing is possible.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `wss://api.example/ws`
    pub url: String,
    /// Value of the CONNECT `host` header
    pub host: String,
    /// Heart-beat offer
    pub heart_beat: HeartBeat,
    /// Timeout for transport open plus handshake
    pub handshake_timeout: Duration,
    /// Delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            host: "localhost".to_string(),
            heart_beat: DEFAULT_HEART_BEAT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
        }
    }
}

/// Actions returned by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a WebSocket with these upgrade headers
    OpenTransport {
        /// Endpoint URL
        url: String,
        /// Upgrade request headers
        headers: Vec<(String, String)>,
    },

    /// Encode and send this frame
    SendFrame(Frame),

    /// Send a bare EOL heart-beat
    SendHeartBeat,

    /// Close the current transport
    CloseTransport,

    /// Public state changed
    StateChanged(SessionState),

    /// Handshake complete and subscription sent
    Established {
        /// Subscribed room
        room_id: RoomId,
        /// True after a reconnect, false for the initial open
        resumed: bool,
    },

    /// The initial open failed; the session is Disconnected again
    OpenFailed(SessionError),

    /// An established session ended without `close`
    Terminated(SessionError),

    /// MESSAGE frame on the room subscription
    Deliver(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Down,
    Opening,
    Handshaking,
    Up,
}

/// Session state machine
///
/// Pure: no I/O, time is passed to every method that needs it. Generic over
/// the instant type to support virtual time in simulation.
#[derive(Debug, Clone)]
pub struct Session<I: Moment> {
    config: SessionConfig,
    auth: AuthContext,
    state: SessionState,
    link: Link,
    room: Option<RoomId>,
    subscription: Option<String>,
    next_subscription: u64,
    next_receipt: u64,
    handshake_deadline: Option<I>,
    reconnect_at: Option<I>,
    heart_beat: Negotiated,
    last_sent: Option<I>,
    last_received: Option<I>,
}

impl<I: Moment> Session<I> {
    /// Create a session in [`SessionState::Disconnected`].
    pub fn new(config: SessionConfig, auth: AuthContext) -> Self {
        Self {
            config,
            auth,
            state: SessionState::Disconnected,
            link: Link::Down,
            room: None,
            subscription: None,
            next_subscription: 0,
            next_receipt: 0,
            handshake_deadline: None,
            reconnect_at: None,
            heart_beat: Negotiated::default(),
            last_sent: None,
            last_received: None,
        }
    }

    /// Current public state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Room the session is opened for.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Heart-beat intervals agreed in the last handshake.
    #[must_use]
    pub fn heart_beat(&self) -> Negotiated {
        self.heart_beat
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the token used by later connection attempts.
    pub fn set_auth(&mut self, auth: AuthContext) {
        self.auth = auth;
    }

    /// Start connecting to `room_id`.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` unless Disconnected
    /// - `SessionError::Auth` if no token is available
    pub fn open(&mut self, room_id: RoomId, now: I) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState { state: self.state, operation: "open" });
        }

        let Some(bearer) = self.auth.bearer() else {
            return Err(SessionError::Auth("no bearer token".to_string()));
        };

        let mut actions = Vec::new();
        self.room = Some(room_id);
        self.set_state(SessionState::Connecting, &mut actions);
        self.start_link(bearer, now, &mut actions);
        Ok(actions)
    }

    /// The driver opened the transport requested by `OpenTransport`.
    ///
    /// Sends CONNECT. Ignored when no open is outstanding.
    pub fn transport_opened(&mut self, now: I) -> Vec<SessionAction> {
        if self.link != Link::Opening {
            return Vec::new();
        }

        let bearer = self.auth.bearer();
        let connect = Frame::connect(&self.config.host, self.config.heart_beat, bearer.as_deref());

        self.link = Link::Handshaking;
        self.last_sent = Some(now);
        vec![SessionAction::SendFrame(connect)]
    }

    /// The transport closed or failed to open.
    pub fn transport_closed(&mut self, reason: &str, now: I) -> Vec<SessionAction> {
        if self.link == Link::Down {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.link = Link::Down;
        self.link_lost(SessionError::Connect(reason.to_string()), now, &mut actions);
        actions
    }

    /// The server refused the WebSocket upgrade (HTTP 401/403).
    ///
    /// Reported as an auth failure instead of a transient drop, so no
    /// reconnect is scheduled.
    pub fn transport_rejected(&mut self, reason: &str, now: I) -> Vec<SessionAction> {
        if self.link == Link::Down {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.link = Link::Down;
        self.link_lost(SessionError::Auth(reason.to_string()), now, &mut actions);
        actions
    }

    /// A heart-beat (bare EOL) arrived.
    pub fn heartbeat_received(&mut self, now: I) {
        if self.link != Link::Down {
            self.last_received = Some(now);
        }
    }

    /// Process an incoming frame.
    ///
    /// Frames arriving without a live link (after close or a drop) are
    /// ignored.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnexpectedFrame` if the command is not valid for the
    ///   current link stage
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.link == Link::Down {
            return Ok(Vec::new());
        }

        self.last_received = Some(now);
        let mut actions = Vec::new();

        match (self.link, frame.command) {
            (Link::Handshaking, Command::Connected) => self.on_connected(frame, now, &mut actions),
            (Link::Handshaking, Command::Error) => {
                // The broker rejects CONNECT with a missing or invalid JWT.
                self.abort_link(&mut actions);
                self.link_lost(SessionError::Auth(error_message(frame)), now, &mut actions);
            },
            (Link::Up, Command::Message) => {
                let ours = frame
                    .header("subscription")
                    .is_none_or(|id| Some(id) == self.subscription.as_deref());
                if ours {
                    actions.push(SessionAction::Deliver(frame.clone()));
                }
            },
            (Link::Up, Command::Receipt) => {},
            (Link::Up, Command::Error) => {
                let reason = format!("server error: {}", error_message(frame));
                self.abort_link(&mut actions);
                self.link_lost(SessionError::Connect(reason), now, &mut actions);
            },
            (_, command) => {
                return Err(SessionError::UnexpectedFrame { state: self.state, command });
            },
        }

        Ok(actions)
    }

    fn on_connected(&mut self, frame: &Frame, now: I, actions: &mut Vec<SessionAction>) {
        let server = frame
            .header("heart-beat")
            .and_then(|value| HeartBeat::parse(value).ok())
            .unwrap_or(HeartBeat::NONE);

        let resumed = matches!(self.state, SessionState::Reconnecting { .. });

        self.heart_beat = self.config.heart_beat.negotiate(server);
        self.link = Link::Up;
        self.handshake_deadline = None;
        self.reconnect_at = None;

        let Some(room) = self.room.clone() else {
            return;
        };

        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;

        self.set_state(SessionState::Connected, actions);
        actions.push(SessionAction::SendFrame(Frame::subscribe(&id, &room_topic(room.as_str()))));
        actions.push(SessionAction::Established { room_id: room, resumed });

        self.subscription = Some(id);
        self.last_sent = Some(now);
    }

    /// Publish a message to the room's send destination.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` unless Connected
    /// - `SessionError::Protocol` if the body cannot be encoded
    pub fn publish(
        &mut self,
        body: &OutgoingMessage,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let invalid = SessionError::InvalidState { state: self.state, operation: "publish" };
        if self.state != SessionState::Connected {
            return Err(invalid);
        }
        let Some(room) = &self.room else {
            return Err(invalid);
        };

        let frame = Frame::send_json(&room_send(room.as_str()), body)?;
        self.last_sent = Some(now);
        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Tear the session down.
    ///
    /// Unsubscribes and disconnects when connected, releases any transport and
    /// disarms every timer. Idempotent: returns nothing when already
    /// Disconnected.
    pub fn close(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.link == Link::Up {
            if let Some(id) = self.subscription.take() {
                actions.push(SessionAction::SendFrame(Frame::unsubscribe(&id)));
            }
            let receipt = format!("disconnect-{}", self.next_receipt);
            self.next_receipt += 1;
            actions.push(SessionAction::SendFrame(Frame::disconnect(&receipt)));
        }

        self.abort_link(&mut actions);
        self.reset(&mut actions);
        actions
    }

    /// Process timers: handshake timeout, reconnect, heart-beats.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if let Some(deadline) = self.handshake_deadline
            && now >= deadline
        {
            let stage = if self.link == Link::Opening { "transport open" } else { "handshake" };
            let reason = format!("{stage} timed out after {:?}", self.config.handshake_timeout);
            self.abort_link(&mut actions);
            self.link_lost(SessionError::Connect(reason), now, &mut actions);
            return actions;
        }

        if let Some(at) = self.reconnect_at
            && now >= at
        {
            self.reconnect_at = None;
            match self.auth.bearer() {
                Some(bearer) => self.start_link(bearer, now, &mut actions),
                None => {
                    self.reset(&mut actions);
                    actions.push(SessionAction::Terminated(SessionError::Auth(
                        "no bearer token".to_string(),
                    )));
                },
            }
            return actions;
        }

        if self.link != Link::Up {
            return actions;
        }

        if let (Some(incoming), Some(last)) = (self.heart_beat.incoming, self.last_received)
            && now >= last + incoming * IDLE_TOLERANCE
        {
            let reason = format!("no data from server for {:?}", now - last);
            self.abort_link(&mut actions);
            self.link_lost(SessionError::Connect(reason), now, &mut actions);
            return actions;
        }

        if let (Some(outgoing), Some(last)) = (self.heart_beat.outgoing, self.last_sent)
            && now >= last + outgoing
        {
            self.last_sent = Some(now);
            actions.push(SessionAction::SendHeartBeat);
        }

        actions
    }

    /// Earliest instant at which [`Self::tick`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<I> {
        let mut idle = None;
        let mut heart_beat = None;

        if self.link == Link::Up {
            idle = self
                .heart_beat
                .incoming
                .zip(self.last_received)
                .map(|(interval, last)| last + interval * IDLE_TOLERANCE);
            heart_beat =
                self.heart_beat.outgoing.zip(self.last_sent).map(|(interval, last)| last + interval);
        }

        [self.handshake_deadline, self.reconnect_at, idle, heart_beat].into_iter().flatten().min()
    }

    fn start_link(&mut self, bearer: String, now: I, actions: &mut Vec<SessionAction>) {
        self.link = Link::Opening;
        self.handshake_deadline = Some(now + self.config.handshake_timeout);
        self.reconnect_at = None;

        actions.push(SessionAction::OpenTransport {
            url: self.config.url.clone(),
            headers: vec![("Authorization".to_string(), bearer)],
        });
    }

    /// Emit `CloseTransport` if a transport exists.
    fn abort_link(&mut self, actions: &mut Vec<SessionAction>) {
        if self.link != Link::Down {
            self.link = Link::Down;
            actions.push(SessionAction::CloseTransport);
        }
    }

    /// The current link is gone. Decide between failing, retrying, or ending.
    fn link_lost(&mut self, err: SessionError, now: I, actions: &mut Vec<SessionAction>) {
        self.handshake_deadline = None;
        self.subscription = None;
        self.heart_beat = Negotiated::default();
        self.last_sent = None;
        self.last_received = None;

        match self.state {
            SessionState::Disconnected => {},
            SessionState::Connecting => {
                self.reset(actions);
                actions.push(SessionAction::OpenFailed(err));
            },
            SessionState::Connected => self.schedule_reconnect(1, now, actions),
            SessionState::Reconnecting { attempt } => {
                if err.is_auth() {
                    self.reset(actions);
                    actions.push(SessionAction::Terminated(err));
                } else {
                    self.schedule_reconnect(attempt + 1, now, actions);
                }
            },
        }
    }

    fn schedule_reconnect(&mut self, attempt: u32, now: I, actions: &mut Vec<SessionAction>) {
        if let Some(max) = self.config.max_reconnect_attempts
            && attempt > max
        {
            self.reset(actions);
            actions.push(SessionAction::Terminated(SessionError::Connect(format!(
                "gave up after {max} reconnect attempts"
            ))));
            return;
        }

        self.reconnect_at = Some(now + self.config.reconnect_delay);
        self.set_state(SessionState::Reconnecting { attempt }, actions);
    }

    fn reset(&mut self, actions: &mut Vec<SessionAction>) {
        self.link = Link::Down;
        self.room = None;
        self.subscription = None;
        self.handshake_deadline = None;
        self.reconnect_at = None;
        self.heart_beat = Negotiated::default();
        self.last_sent = None;
        self.last_received = None;
        self.set_state(SessionState::Disconnected, actions);
    }

    fn set_state(&mut self, state: SessionState, actions: &mut Vec<SessionAction>) {
        if self.state != state {
            self.state = state;
            actions.push(SessionAction::StateChanged(state));
        }
    }
}

fn error_message(frame: &Frame) -> String {
    frame
        .header("message")
        .map(str::to_string)
        .or_else(|| frame.body_str().ok().filter(|b| !b.is_empty()).map(str::to_string))
        .unwrap_or_else(|| "ERROR frame".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crewchat_proto::payloads::MessageKind;

    use super::*;

    fn session() -> Session<Instant> {
        Session::new(SessionConfig::default(), AuthContext::new("jwt"))
    }

    fn connected_frame(heart_beat: &str) -> Frame {
        Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", heart_beat)
    }

    fn sent_frames(actions: &[SessionAction]) -> Vec<&Frame> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::SendFrame(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Session connected to room `r1` at `now`, with server heart-beat `hb`.
    fn connected(now: Instant, hb: &str) -> Session<Instant> {
        let mut s = session();
        s.open(RoomId::new("r1"), now).unwrap();
        s.transport_opened(now);
        s.handle_frame(&connected_frame(hb), now).unwrap();
        assert_eq!(s.state(), SessionState::Connected);
        s
    }

    #[test]
    fn open_without_token_is_auth_error() {
        let mut s: Session<Instant> =
            Session::new(SessionConfig::default(), AuthContext::anonymous());

        let result = s.open(RoomId::new("r1"), Instant::now());

        assert!(matches!(result, Err(SessionError::Auth(_))));
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn open_requests_transport_with_bearer() {
        let mut s = session();
        let actions = s.open(RoomId::new("r1"), Instant::now()).unwrap();

        assert_eq!(actions, [
            SessionAction::StateChanged(SessionState::Connecting),
            SessionAction::OpenTransport {
                url: "ws://localhost:8080/ws".into(),
                headers: vec![("Authorization".into(), "Bearer jwt".into())],
            },
        ]);
    }

    #[test]
    fn rejected_upgrade_fails_open_as_auth() {
        let mut s = session();
        let now = Instant::now();
        s.open(RoomId::new("r1"), now).unwrap();

        let actions = s.transport_rejected("HTTP 401", now);

        assert!(actions.iter().any(|a| matches!(a, SessionAction::OpenFailed(e) if e.is_auth())));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn rejected_upgrade_while_reconnecting_terminates() {
        let now = Instant::now();
        let mut s = connected(now, "0,0");
        s.transport_closed("reset", now);
        let at = now + DEFAULT_RECONNECT_DELAY;
        s.tick(at);

        let actions = s.transport_rejected("HTTP 403", at);

        assert!(actions.iter().any(|a| matches!(a, SessionAction::Terminated(e) if e.is_auth())));
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn open_twice_is_invalid() {
        let mut s = session();
        let now = Instant::now();
        s.open(RoomId::new("r1"), now).unwrap();

        assert!(matches!(
            s.open(RoomId::new("r2"), now),
            Err(SessionError::InvalidState { operation: "open", .. })
        ));
    }

    #[test]
    fn handshake_subscribes_to_room_topic() {
        let mut s = session();
        let now = Instant::now();
        s.open(RoomId::new("r1"), now).unwrap();

        let actions = s.transport_opened(now);
        let connect = sent_frames(&actions)[0].clone();
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.header("Authorization"), Some("Bearer jwt"));
        assert_eq!(connect.header("accept-version"), Some("1.2"));
        assert_eq!(connect.header("heart-beat"), Some("10000,10000"));

        let actions = s.handle_frame(&connected_frame("0,0"), now).unwrap();
        let subscribe = sent_frames(&actions)[0];
        assert_eq!(subscribe.command, Command::Subscribe);
        assert_eq!(subscribe.header("destination"), Some("/topic/chat/r1"));
        assert!(actions.contains(&SessionAction::StateChanged(SessionState::Connected)));
        assert!(actions.contains(&SessionAction::Established {
            room_id: RoomId::new("r1"),
            resumed: false
        }));
    }

    #[test]
    fn error_during_handshake_is_auth_failure() {
        let mut s = session();
        let now = Instant::now();
        s.open(RoomId::new("r1"), now).unwrap();
        s.transport_opened(now);

        let error = Frame::new(Command::Error).with_header("message", "invalid token");
        let actions = s.handle_frame(&error, now).unwrap();

        assert_eq!(actions, [
            SessionAction::CloseTransport,
            SessionAction::StateChanged(SessionState::Disconnected),
            SessionAction::OpenFailed(SessionError::Auth("invalid token".into())),
        ]);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn transport_failure_during_open_is_connect_failure() {
        let mut s = session();
        let now = Instant::now();
        s.open(RoomId::new("r1"), now).unwrap();

        let actions = s.transport_closed("connection refused", now);

        assert_eq!(actions, [
            SessionAction::StateChanged(SessionState::Disconnected),
            SessionAction::OpenFailed(SessionError::Connect("connection refused".into())),
        ]);
    }

    #[test]
    fn handshake_timeout_fails_open() {
        let mut s = session();
        let start = Instant::now();
        s.open(RoomId::new("r1"), start).unwrap();
        s.transport_opened(start);

        assert_eq!(s.next_deadline(), Some(start + DEFAULT_HANDSHAKE_TIMEOUT));
        assert!(s.tick(start + Duration::from_secs(9)).is_empty());

        let actions = s.tick(start + DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(actions[0], SessionAction::CloseTransport);
        assert!(matches!(actions.last(), Some(SessionAction::OpenFailed(SessionError::Connect(_)))));
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn drop_reconnects_after_fixed_delay_and_resubscribes() {
        let start = Instant::now();
        let mut s = connected(start, "0,0");

        let dropped = start + Duration::from_secs(30);
        let actions = s.transport_closed("reset by peer", dropped);
        assert_eq!(actions, [SessionAction::StateChanged(SessionState::Reconnecting { attempt: 1 })]);
        assert_eq!(s.next_deadline(), Some(dropped + DEFAULT_RECONNECT_DELAY));

        assert!(s.tick(dropped + Duration::from_millis(4999)).is_empty());

        let due = dropped + DEFAULT_RECONNECT_DELAY;
        let actions = s.tick(due);
        assert!(matches!(actions.as_slice(), [SessionAction::OpenTransport { .. }]));

        s.transport_opened(due);
        let actions = s.handle_frame(&connected_frame("0,0"), due).unwrap();
        assert_eq!(sent_frames(&actions)[0].header("destination"), Some("/topic/chat/r1"));
        assert!(actions.contains(&SessionAction::Established {
            room_id: RoomId::new("r1"),
            resumed: true
        }));
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn failed_reconnect_attempt_counts_up() {
        let start = Instant::now();
        let mut s = connected(start, "0,0");
        s.transport_closed("gone", start);

        let due = start + DEFAULT_RECONNECT_DELAY;
        s.tick(due);
        let actions = s.transport_closed("refused", due);

        assert_eq!(actions, [SessionAction::StateChanged(SessionState::Reconnecting { attempt: 2 })]);
        assert_eq!(s.next_deadline(), Some(due + DEFAULT_RECONNECT_DELAY));
    }

    #[test]
    fn reconnect_cap_terminates() {
        let start = Instant::now();
        let config = SessionConfig { max_reconnect_attempts: Some(1), ..SessionConfig::default() };
        let mut s = Session::new(config, AuthContext::new("jwt"));
        s.open(RoomId::new("r1"), start).unwrap();
        s.transport_opened(start);
        s.handle_frame(&connected_frame("0,0"), start).unwrap();

        s.transport_closed("gone", start);
        let due = start + DEFAULT_RECONNECT_DELAY;
        s.tick(due);
        let actions = s.transport_closed("refused", due);

        assert!(matches!(
            actions.last(),
            Some(SessionAction::Terminated(SessionError::Connect(_)))
        ));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn auth_error_on_reconnect_terminates() {
        let start = Instant::now();
        let mut s = connected(start, "0,0");
        s.transport_closed("gone", start);

        let due = start + DEFAULT_RECONNECT_DELAY;
        s.tick(due);
        s.transport_opened(due);
        let actions = s.handle_frame(&Frame::new(Command::Error), due).unwrap();

        assert!(matches!(actions.last(), Some(SessionAction::Terminated(SessionError::Auth(_)))));
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn close_when_connected_unsubscribes_and_disconnects() {
        let mut s = connected(Instant::now(), "0,0");

        let actions = s.close();
        let frames = sent_frames(&actions);

        assert_eq!(frames[0].command, Command::Unsubscribe);
        assert_eq!(frames[0].header("id"), Some("sub-0"));
        assert_eq!(frames[1].command, Command::Disconnect);
        assert_eq!(&actions[2..], [
            SessionAction::CloseTransport,
            SessionAction::StateChanged(SessionState::Disconnected)
        ]);

        assert!(s.close().is_empty());
    }

    #[test]
    fn close_while_reconnecting_disarms_timer() {
        let start = Instant::now();
        let mut s = connected(start, "0,0");
        s.transport_closed("gone", start);

        let actions = s.close();
        assert_eq!(actions, [SessionAction::StateChanged(SessionState::Disconnected)]);
        assert_eq!(s.next_deadline(), None);
        assert!(s.tick(start + Duration::from_secs(60)).is_empty());
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn frames_after_close_are_ignored() {
        let now = Instant::now();
        let mut s = connected(now, "0,0");
        s.close();

        let message = Frame::new(Command::Message).with_body("{}");
        assert!(s.handle_frame(&message, now).unwrap().is_empty());
        assert!(s.transport_closed("late", now).is_empty());
    }

    #[test]
    fn publish_requires_connected() {
        let now = Instant::now();
        let body = OutgoingMessage {
            content: "hi".into(),
            kind: Some(MessageKind::Text),
            client_message_id: None,
        };

        let mut idle = session();
        assert!(matches!(
            idle.publish(&body, now),
            Err(SessionError::InvalidState { operation: "publish", .. })
        ));

        let mut s = connected(now, "0,0");
        let actions = s.publish(&body, now).unwrap();
        let frame = sent_frames(&actions)[0];
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.header("destination"), Some("/app/r1/send"));
        assert_eq!(frame.body_str().unwrap(), r#"{"content":"hi","type":"TEXT"}"#);
    }

    #[test]
    fn message_on_subscription_is_delivered() {
        let now = Instant::now();
        let mut s = connected(now, "0,0");

        let ours = Frame::new(Command::Message).with_header("subscription", "sub-0");
        let other = Frame::new(Command::Message).with_header("subscription", "sub-9");

        assert_eq!(s.handle_frame(&ours, now).unwrap(), [SessionAction::Deliver(ours.clone())]);
        assert!(s.handle_frame(&other, now).unwrap().is_empty());
    }

    #[test]
    fn message_during_handshake_is_unexpected() {
        let mut s = session();
        let now = Instant::now();
        s.open(RoomId::new("r1"), now).unwrap();
        s.transport_opened(now);

        let result = s.handle_frame(&Frame::new(Command::Message), now);
        assert!(matches!(
            result,
            Err(SessionError::UnexpectedFrame { command: Command::Message, .. })
        ));
    }

    #[test]
    fn heart_beats_are_sent_and_silence_drops_link() {
        let start = Instant::now();
        let mut s = connected(start, "10000,10000");

        assert_eq!(s.heart_beat().outgoing, Some(Duration::from_secs(10)));
        assert_eq!(s.next_deadline(), Some(start + Duration::from_secs(10)));

        let t1 = start + Duration::from_secs(10);
        assert_eq!(s.tick(t1), [SessionAction::SendHeartBeat]);

        s.heartbeat_received(t1);
        let t2 = t1 + Duration::from_secs(10);
        assert_eq!(s.tick(t2), [SessionAction::SendHeartBeat]);

        let actions = s.tick(t1 + Duration::from_secs(20));
        assert_eq!(actions, [
            SessionAction::CloseTransport,
            SessionAction::StateChanged(SessionState::Reconnecting { attempt: 1 })
        ]);
    }

    #[test]
    fn error_frame_while_connected_reconnects() {
        let now = Instant::now();
        let mut s = connected(now, "0,0");

        let actions = s.handle_frame(&Frame::new(Command::Error), now).unwrap();
        assert_eq!(actions, [
            SessionAction::CloseTransport,
            SessionAction::StateChanged(SessionState::Reconnecting { attempt: 1 })
        ]);
    }
}
