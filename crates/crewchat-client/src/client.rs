//! Top-level chat client state machine.
//!
//! Combines the [`Session`] (connection, subscription, reconnect) with the
//! [`DeliveryReconciler`] (optimistic sends, echo matching, history) of the
//! single open room, and tracks the in-flight history request.

use crewchat_core::{
    AuthContext, ChatMessage, DeliveryReconciler, Environment, LocalId, MessageStore, Profile,
    ReconcilerConfig, RoomId, Session, SessionAction, SessionConfig, SessionState,
};
use crewchat_proto::{Frame, payloads::ChatMessageDto};

use crate::{
    error::{ClientError, FetchError},
    event::{ClientAction, ClientEvent},
};

/// Client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Session timing and endpoint
    pub session: SessionConfig,
    /// Send timeout
    pub reconciler: ReconcilerConfig,
}

/// Chat client for one room view at a time.
///
/// Sans-IO: [`ChatClient::handle`] consumes a [`ClientEvent`] and returns the
/// [`ClientAction`]s the caller must execute.
pub struct ChatClient<E: Environment> {
    env: E,
    config: ClientConfig,
    session: Session<E::Instant>,
    room: Option<DeliveryReconciler<E::Instant>>,
    profile: Option<Profile>,
    history_request: Option<u64>,
}

impl<E: Environment> ChatClient<E> {
    /// Create a client with no room open.
    pub fn new(env: E, config: ClientConfig, auth: AuthContext) -> Self {
        let session = Session::new(config.session.clone(), auth);
        Self { env, config, session, room: None, profile: None, history_request: None }
    }

    /// Connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Room currently open.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.room.as_ref().map(DeliveryReconciler::room_id)
    }

    /// Messages of the open room in display order. Empty with no room.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        self.room.as_ref().map_or(&[], |room| room.store().as_slice())
    }

    /// Message store of the open room.
    #[must_use]
    pub fn store(&self) -> Option<&MessageStore> {
        self.room.as_ref().map(DeliveryReconciler::store)
    }

    /// Current user's profile, once loaded.
    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// In-flight history request id.
    #[must_use]
    pub fn history_request(&self) -> Option<u64> {
        self.history_request
    }

    /// Replace the token for later connection attempts.
    pub fn set_auth(&mut self, auth: AuthContext) {
        self.session.set_auth(auth);
    }

    /// Earliest instant at which a `Tick` has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<E::Instant> {
        let reconciler = self.room.as_ref().and_then(DeliveryReconciler::next_deadline);
        [self.session.next_deadline(), reconciler].into_iter().flatten().min()
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::OpenRoom(room_id) => self.handle_open_room(room_id),
            ClientEvent::CloseRoom => Ok(self.handle_close_room()),
            ClientEvent::Send(text) => self.handle_send(&text),
            ClientEvent::Retry(local_id) => self.handle_retry(local_id),
            ClientEvent::ProfileLoaded(profile) => Ok(self.handle_profile(profile)),
            ClientEvent::TransportOpened => {
                let now = self.env.now();
                let actions = self.session.transport_opened(now);
                Ok(self.apply(actions))
            },
            ClientEvent::TransportClosed { reason } => {
                let now = self.env.now();
                let actions = self.session.transport_closed(&reason, now);
                Ok(self.apply(actions))
            },
            ClientEvent::TransportRejected { reason } => {
                let now = self.env.now();
                let actions = self.session.transport_rejected(&reason, now);
                Ok(self.apply(actions))
            },
            ClientEvent::FrameReceived(frame) => {
                let now = self.env.now();
                let actions = self.session.handle_frame(&frame, now)?;
                Ok(self.apply(actions))
            },
            ClientEvent::HeartBeatReceived => {
                self.session.heartbeat_received(self.env.now());
                Ok(Vec::new())
            },
            ClientEvent::HistoryLoaded { request_id, result } => {
                Ok(self.handle_history(request_id, result))
            },
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    fn handle_open_room(&mut self, room_id: RoomId) -> Result<Vec<ClientAction>, ClientError> {
        if let Some(open) = self.room_id() {
            return Err(ClientError::RoomAlreadyOpen { room_id: open.clone() });
        }

        let now = self.env.now();
        let session_actions = self.session.open(room_id.clone(), now)?;

        let mut room = DeliveryReconciler::new(room_id.clone(), self.config.reconciler.clone());
        room.set_profile(self.profile.clone());
        self.room = Some(room);

        let request_id = self.env.random_u64();
        self.history_request = Some(request_id);

        let mut actions = self.apply(session_actions);
        actions.push(ClientAction::FetchHistory { request_id, room_id });
        Ok(actions)
    }

    /// Idempotent: closing with nothing open returns no actions.
    fn handle_close_room(&mut self) -> Vec<ClientAction> {
        let session_actions = self.session.close();
        let mut actions = self.apply(session_actions);
        actions.extend(self.drop_room());
        actions
    }

    fn drop_room(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        if let Some(request_id) = self.history_request.take() {
            actions.push(ClientAction::CancelHistory { request_id });
        }
        if self.room.take().is_some() {
            actions.push(ClientAction::MessagesChanged);
        }
        actions
    }

    fn handle_send(&mut self, text: &str) -> Result<Vec<ClientAction>, ClientError> {
        let state = self.session.state();
        let Some(room) = self.room.as_mut() else {
            return Err(ClientError::NoRoomOpen);
        };
        if !state.is_connected() {
            return Err(ClientError::NotConnected { state });
        }

        let correlation = format!("{:016x}", self.env.random_u64());
        let now = self.env.now();
        let outgoing = room.send(text, correlation, now, self.env.wall_clock())?;

        let mut actions = vec![ClientAction::MessagesChanged];
        let published = self.session.publish(&outgoing.body, now)?;
        actions.extend(self.apply(published));
        Ok(actions)
    }

    fn handle_retry(&mut self, local_id: LocalId) -> Result<Vec<ClientAction>, ClientError> {
        let state = self.session.state();
        let Some(room) = self.room.as_mut() else {
            return Err(ClientError::NoRoomOpen);
        };
        if !state.is_connected() {
            return Err(ClientError::NotConnected { state });
        }

        let now = self.env.now();
        let outgoing = room.retry(local_id, now)?;

        let mut actions = vec![ClientAction::MessagesChanged];
        let published = self.session.publish(&outgoing.body, now)?;
        actions.extend(self.apply(published));
        Ok(actions)
    }

    fn handle_profile(&mut self, profile: Profile) -> Vec<ClientAction> {
        let claimed = self.room.as_mut().is_some_and(|room| room.set_profile(Some(profile.clone())));
        self.profile = Some(profile);

        if claimed { vec![ClientAction::MessagesChanged] } else { Vec::new() }
    }

    fn handle_history(
        &mut self,
        request_id: u64,
        result: Result<Vec<ChatMessageDto>, FetchError>,
    ) -> Vec<ClientAction> {
        if self.history_request != Some(request_id) {
            return vec![ClientAction::Log {
                message: format!("ignoring stale history response {request_id:016x}"),
            }];
        }
        self.history_request = None;

        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };

        match result {
            Ok(newest_first) => {
                room.load_history(newest_first);
                vec![ClientAction::MessagesChanged]
            },
            Err(err) => vec![ClientAction::HistoryFailed(err)],
        }
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let session_actions = self.session.tick(now);
        let mut actions = self.apply(session_actions);

        if let Some(room) = self.room.as_mut() {
            let failed = room.expire(now);
            if !failed.is_empty() {
                actions.extend(failed.into_iter().map(ClientAction::DeliveryFailed));
                actions.push(ClientAction::MessagesChanged);
            }
        }

        actions
    }

    /// Translate session actions, consuming the ones handled here.
    fn apply(&mut self, session_actions: Vec<SessionAction>) -> Vec<ClientAction> {
        let mut actions = Vec::with_capacity(session_actions.len());

        for action in session_actions {
            match action {
                SessionAction::OpenTransport { url, headers } => {
                    actions.push(ClientAction::OpenTransport { url, headers });
                },
                SessionAction::SendFrame(frame) => actions.push(ClientAction::SendFrame(frame)),
                SessionAction::SendHeartBeat => actions.push(ClientAction::SendHeartBeat),
                SessionAction::CloseTransport => actions.push(ClientAction::CloseTransport),
                SessionAction::StateChanged(state) => {
                    actions.push(ClientAction::StateChanged(state));
                },
                SessionAction::Established { room_id, resumed } => {
                    actions.push(ClientAction::RoomOpened { room_id, resumed });
                },
                SessionAction::OpenFailed(err) => {
                    actions.extend(self.drop_room());
                    actions.push(ClientAction::OpenFailed(err));
                },
                SessionAction::Terminated(err) => actions.push(ClientAction::SessionEnded(err)),
                SessionAction::Deliver(frame) => actions.push(self.deliver(&frame)),
            }
        }

        actions
    }

    fn deliver(&mut self, frame: &Frame) -> ClientAction {
        let Some(room) = self.room.as_mut() else {
            return ClientAction::Log { message: "MESSAGE without an open room".to_string() };
        };

        match frame.body_json::<ChatMessageDto>() {
            Ok(dto) => {
                room.on_echo(dto);
                ClientAction::MessagesChanged
            },
            Err(err) => ClientAction::Log { message: format!("dropping undecodable MESSAGE: {err}") },
        }
    }
}
