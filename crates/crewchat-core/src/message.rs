//! Chat messages and their delivery state.

use std::fmt;

use chrono::{DateTime, Utc};
use crewchat_proto::payloads::{ChatMessageDto, MessageKind};

use crate::room::{Profile, RoomId};

/// Temporary id of a message sent from this client and not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl LocalId {
    /// Wrap a raw local id.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Message identity: local until the server echo assigns a persistent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Unconfirmed local send
    Local(LocalId),
    /// Server-issued id
    Server(i64),
}

impl MessageId {
    /// Local id, if unconfirmed.
    #[must_use]
    pub fn local(self) -> Option<LocalId> {
        match self {
            Self::Local(id) => Some(id),
            Self::Server(_) => None,
        }
    }

    /// Server id, if confirmed.
    #[must_use]
    pub fn server(self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Sent locally, echo not yet received
    Pending,
    /// Persisted by the server
    Confirmed,
    /// No echo within the send timeout
    Failed,
}

/// A message in the open room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Local or server id
    pub id: MessageId,
    /// Room the message belongs to
    pub room_id: RoomId,
    /// Sender's member id, when the server reports it
    pub sender_id: Option<i64>,
    /// Sender's display name
    pub sender_nickname: String,
    /// Sender's avatar
    pub sender_avatar_url: Option<String>,
    /// Message body
    pub content: String,
    /// Content kind
    pub kind: MessageKind,
    /// Server timestamp once confirmed, local send time before
    pub timestamp: DateTime<Utc>,
    /// Delivery state
    pub delivery: DeliveryState,
}

impl ChatMessage {
    /// Pending text message sent by `sender`.
    pub fn pending(
        id: LocalId,
        room_id: RoomId,
        sender: Option<&Profile>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::Local(id),
            room_id,
            sender_id: None,
            sender_nickname: sender.map(|p| p.nickname.clone()).unwrap_or_default(),
            sender_avatar_url: sender.and_then(|p| p.avatar_url.clone()),
            content: content.into(),
            kind: MessageKind::Text,
            timestamp,
            delivery: DeliveryState::Pending,
        }
    }

    /// Confirmed message from a server document.
    ///
    /// `room_id` is used when the document does not name its room.
    pub fn confirmed(room_id: &RoomId, dto: ChatMessageDto) -> Self {
        Self {
            id: MessageId::Server(dto.id),
            room_id: dto.chat_room_id.map_or_else(|| room_id.clone(), RoomId::from),
            sender_id: dto.sender_id,
            sender_nickname: dto.sender_nickname,
            sender_avatar_url: dto.sender_avatar_url,
            content: dto.content,
            kind: dto.kind.unwrap_or_default(),
            timestamp: dto.timestamp,
            delivery: DeliveryState::Confirmed,
        }
    }

    /// Whether the message awaits its echo.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }

    /// Whether the message timed out.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.delivery == DeliveryState::Failed
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn dto(json: &str) -> ChatMessageDto {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn confirmed_defaults_room_and_kind() {
        let room = RoomId::new("r1");
        let message = ChatMessage::confirmed(
            &room,
            dto(r#"{"id":5,"senderNickname":"a","content":"x","timestamp":0}"#),
        );

        assert_eq!(message.id, MessageId::Server(5));
        assert_eq!(message.room_id, room);
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn confirmed_prefers_document_room() {
        let message = ChatMessage::confirmed(
            &RoomId::new("r1"),
            dto(r#"{"id":5,"chatRoomId":"r2","senderNickname":"a","content":"x","timestamp":0}"#),
        );
        assert_eq!(message.room_id, RoomId::new("r2"));
    }

    #[test]
    fn pending_uses_sender_profile() {
        let profile = Profile {
            username: None,
            nickname: "me".into(),
            avatar_url: Some("/a.png".into()),
        };
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = ChatMessage::pending(LocalId::new(1), RoomId::new("r"), Some(&profile), "hi", at);

        assert!(message.is_pending());
        assert_eq!(message.id.local(), Some(LocalId::new(1)));
        assert_eq!(message.id.server(), None);
        assert_eq!(message.sender_nickname, "me");
        assert_eq!(message.sender_avatar_url.as_deref(), Some("/a.png"));
    }
}
