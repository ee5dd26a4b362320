//! Rooms and the current user's profile.

use std::fmt;

use chrono::{DateTime, Utc};
use crewchat_proto::payloads::{MessageKind, ProfileDto, RoomKind, RoomSummary};
use serde::{Deserialize, Serialize};

/// Opaque room token issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a room token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Token as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat room as listed by the backend. Read-only to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRoom {
    /// Room token
    pub id: RoomId,
    /// Display name
    pub name: String,
    /// Members currently in the room
    pub current_participants: u32,
    /// Room capacity
    pub max_participants: u32,
    /// Group or direct
    pub kind: RoomKind,
    /// Time of the latest message
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Body of the latest message
    pub last_content: Option<String>,
    /// Kind of the latest message
    pub last_kind: Option<MessageKind>,
    /// Peer nickname for direct rooms
    pub peer_nickname: Option<String>,
    /// Peer avatar for direct rooms
    pub peer_avatar_url: Option<String>,
}

impl ChatRoom {
    /// Name to show in a room list: the peer's nickname for direct rooms.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match (self.kind, self.peer_nickname.as_deref()) {
            (RoomKind::Direct, Some(peer)) => peer,
            _ => &self.name,
        }
    }

    /// Whether the room has no free seat.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.max_participants > 0 && self.current_participants >= self.max_participants
    }
}

impl From<RoomSummary> for ChatRoom {
    fn from(summary: RoomSummary) -> Self {
        // Older servers omit `type`; only direct rooms carry a peer nickname.
        let kind = summary.kind.unwrap_or(if summary.nickname.is_some() {
            RoomKind::Direct
        } else {
            RoomKind::Group
        });

        Self {
            id: RoomId(summary.id),
            name: summary.name,
            current_participants: summary.current_participants,
            max_participants: summary.max_participants,
            kind,
            last_sent_at: summary.last_send_at,
            last_content: summary.last_content,
            last_kind: summary.last_type,
            peer_nickname: summary.nickname,
            peer_avatar_url: summary.avatar_url,
        }
    }
}

/// The signed-in user, used to recognise the user's own echoes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    /// Login name
    pub username: Option<String>,
    /// Display name, compared against a message's sender nickname
    pub nickname: String,
    /// Avatar URL
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Profile with only a nickname.
    pub fn new(nickname: impl Into<String>) -> Self {
        Self { username: None, nickname: nickname.into(), avatar_url: None }
    }

    /// Whether a message with this sender nickname was sent by this user.
    #[must_use]
    pub fn is_sender(&self, sender_nickname: &str) -> bool {
        self.nickname == sender_nickname
    }
}

impl From<ProfileDto> for Profile {
    fn from(dto: ProfileDto) -> Self {
        Self { username: dto.username, nickname: dto.nickname, avatar_url: dto.avatar_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(json: &str) -> RoomSummary {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn direct_room_shows_peer_name() {
        let room = ChatRoom::from(summary(
            r#"{"id":"r1","name":"dm-3-7","type":"DIRECT","nickname":"pacer","maxParticipants":2,"currentParticipants":2}"#,
        ));

        assert_eq!(room.kind, RoomKind::Direct);
        assert_eq!(room.display_name(), "pacer");
        assert!(room.is_full());
    }

    #[test]
    fn missing_kind_is_inferred() {
        let group = ChatRoom::from(summary(r#"{"id":"r1","name":"crew"}"#));
        let direct = ChatRoom::from(summary(r#"{"id":"r2","name":"dm","nickname":"x"}"#));

        assert_eq!(group.kind, RoomKind::Group);
        assert_eq!(group.display_name(), "crew");
        assert!(!group.is_full());
        assert_eq!(direct.kind, RoomKind::Direct);
    }

    #[test]
    fn room_id_serializes_as_plain_string() {
        let id = RoomId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }
}
