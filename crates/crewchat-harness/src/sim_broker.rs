//! In-process STOMP broker standing in for the chat backend.
//!
//! Models one client connection: the upgrade check, the CONNECT handshake,
//! room subscriptions, persisting published messages and echoing them to the
//! room topic, plus the REST history listing. Knobs let tests drop echoes,
//! strip correlation ids or reject tokens.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use crewchat_core::RoomId;
use crewchat_proto::{
    Command, Frame, HeartBeat,
    destination::{room_of_topic, room_topic},
    payloads::{ChatMessageDto, MessageKind, OutgoingMessage},
};

/// Author of messages published by this client's user.
pub const SELF_NICKNAME: &str = "me";

const SELF_SENDER_ID: i64 = 1;
const APP_PREFIX: &str = "/app/";
const SEND_SUFFIX: &str = "/send";

/// Scripted broker state.
#[derive(Debug)]
pub struct SimBroker {
    bearer: String,
    heart_beat: HeartBeat,
    echo: bool,
    echo_correlation: bool,
    connected: bool,
    subscriptions: HashMap<String, String>,
    rooms: BTreeMap<String, Vec<ChatMessageDto>>,
    next_message_id: i64,
    next_frame_id: u64,
    received: Vec<Frame>,
}

impl SimBroker {
    /// Broker accepting `token` as the only valid credential.
    pub fn new(token: &str) -> Self {
        Self {
            bearer: format!("Bearer {token}"),
            heart_beat: HeartBeat::NONE,
            echo: true,
            echo_correlation: true,
            connected: false,
            subscriptions: HashMap::new(),
            rooms: BTreeMap::new(),
            next_message_id: 1,
            next_frame_id: 1,
            received: Vec::new(),
        }
    }

    /// Heart-beat the broker announces in CONNECTED.
    pub fn set_heart_beat(&mut self, heart_beat: HeartBeat) {
        self.heart_beat = heart_beat;
    }

    /// Whether published messages are delivered back to subscribers.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Whether echoes carry the sender's `clientMessageId`.
    pub fn set_echo_correlation(&mut self, echo_correlation: bool) {
        self.echo_correlation = echo_correlation;
    }

    /// Frames received from the client, in order.
    pub fn received(&self) -> &[Frame] {
        &self.received
    }

    /// Commands received from the client, in order.
    pub fn received_commands(&self) -> Vec<Command> {
        self.received.iter().map(|f| f.command).collect()
    }

    /// STOMP session established and not yet torn down.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Live subscription destinations.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.values().map(String::as_str)
    }

    /// Whether the WebSocket upgrade carries a valid token.
    pub fn accepts_upgrade(&self, headers: &[(String, String)]) -> bool {
        headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case("authorization") && *value == self.bearer)
    }

    /// The transport went away.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.subscriptions.clear();
    }

    /// Process a client frame and return the replies for this client.
    pub fn receive(&mut self, frame: &Frame, at: DateTime<Utc>) -> Vec<Frame> {
        self.received.push(frame.clone());

        match frame.command {
            Command::Connect | Command::Stomp => self.on_connect(frame),
            Command::Subscribe if self.connected => {
                if let (Some(id), Some(destination)) = (frame.header("id"), frame.header("destination")) {
                    self.subscriptions.insert(id.to_string(), destination.to_string());
                }
                Vec::new()
            },
            Command::Unsubscribe => {
                if let Some(id) = frame.header("id") {
                    self.subscriptions.remove(id);
                }
                Vec::new()
            },
            Command::Send if self.connected => self.on_send(frame, at),
            Command::Disconnect => {
                let receipt = frame.header("receipt").map(|id| {
                    Frame::new(Command::Receipt).with_header("receipt-id", id)
                });
                self.disconnect();
                receipt.into_iter().collect()
            },
            _ => vec![error("unexpected frame")],
        }
    }

    fn on_connect(&mut self, frame: &Frame) -> Vec<Frame> {
        if frame.header("Authorization") != Some(self.bearer.as_str()) {
            self.connected = false;
            return vec![error("Unauthorized")];
        }

        self.connected = true;
        vec![
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", self.heart_beat.to_string()),
        ]
    }

    fn on_send(&mut self, frame: &Frame, at: DateTime<Utc>) -> Vec<Frame> {
        let Some(room) = frame
            .header("destination")
            .and_then(|d| d.strip_prefix(APP_PREFIX))
            .and_then(|d| d.strip_suffix(SEND_SUFFIX))
            .map(str::to_string)
        else {
            return vec![error("unknown destination")];
        };

        let Ok(body) = frame.body_json::<OutgoingMessage>() else {
            return vec![error("malformed message")];
        };

        let correlation = body.client_message_id.filter(|_| self.echo_correlation);
        let dto = self.store(&room, SELF_SENDER_ID, SELF_NICKNAME, body.content, at, correlation);

        if self.echo { self.deliver(&room, &dto) } else { Vec::new() }
    }

    /// A message from another participant. Returns the frames for this
    /// client's subscriptions to the room.
    pub fn publish_foreign(
        &mut self,
        room_id: &RoomId,
        sender: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Vec<Frame> {
        let sender_id = 100 + i64::try_from(sender.len()).unwrap_or(0);
        let dto = self.store(room_id.as_str(), sender_id, sender, content.to_string(), at, None);
        self.deliver(room_id.as_str(), &dto)
    }

    /// Deliver an already persisted message again, as a late echo.
    pub fn redeliver(&mut self, room_id: &RoomId, server_id: i64) -> Vec<Frame> {
        let stored = self
            .rooms
            .get(room_id.as_str())
            .and_then(|messages| messages.iter().find(|m| m.id == server_id))
            .cloned();

        match stored {
            Some(dto) => self.deliver(room_id.as_str(), &dto),
            None => Vec::new(),
        }
    }

    /// Persist a message without delivering it.
    pub fn seed_history(&mut self, room_id: &RoomId, sender: &str, content: &str, at: DateTime<Utc>) {
        self.store(room_id.as_str(), 2, sender, content.to_string(), at, None);
    }

    /// Room history newest first, as the REST endpoint returns it.
    pub fn history(&self, room_id: &RoomId) -> Vec<ChatMessageDto> {
        self.rooms.get(room_id.as_str()).map_or_else(Vec::new, |messages| {
            messages.iter().rev().cloned().map(|mut m| {
                m.client_message_id = None;
                m
            }).collect()
        })
    }

    fn store(
        &mut self,
        room: &str,
        sender_id: i64,
        sender: &str,
        content: String,
        at: DateTime<Utc>,
        correlation: Option<String>,
    ) -> ChatMessageDto {
        let dto = ChatMessageDto {
            id: self.next_message_id,
            chat_room_id: Some(room.to_string()),
            sender_id: Some(sender_id),
            sender_nickname: sender.to_string(),
            content,
            kind: Some(MessageKind::Text),
            timestamp: at,
            sender_avatar_url: None,
            client_message_id: correlation,
        };
        self.next_message_id += 1;
        self.rooms.entry(room.to_string()).or_default().push(dto.clone());
        dto
    }

    fn deliver(&mut self, room: &str, dto: &ChatMessageDto) -> Vec<Frame> {
        if !self.connected {
            return Vec::new();
        }

        let Ok(body) = serde_json::to_vec(dto) else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        for (id, destination) in &self.subscriptions {
            if room_of_topic(destination) != Some(room) {
                continue;
            }
            frames.push(
                Frame::new(Command::Message)
                    .with_header("subscription", id.as_str())
                    .with_header("destination", room_topic(room))
                    .with_header("message-id", self.next_frame_id.to_string())
                    .with_header("content-type", "application/json")
                    .with_body(body.clone()),
            );
            self.next_frame_id += 1;
        }
        frames
    }
}

fn error(message: &str) -> Frame {
    Frame::new(Command::Error).with_header("message", message)
}
