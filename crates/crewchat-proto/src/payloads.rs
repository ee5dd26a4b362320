//! JSON documents exchanged with the chat broker and REST API.
//!
//! Field names follow the backend's camelCase DTOs. Fields the backend may
//! omit or send as `null` are `Option`s with `#[serde(default)]`, so older
//! and newer servers decode alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Plain text
    #[default]
    Text,
    /// Image URL produced by the upload endpoint
    Image,
    /// Any kind this client does not know yet
    #[serde(other)]
    Unknown,
}

/// Kind of chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomKind {
    /// Crew room with bounded participants
    Group,
    /// One-to-one conversation
    Direct,
}

/// A persisted chat message, as broadcast on the room topic and returned by
/// the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageDto {
    /// Server-issued message id
    pub id: i64,
    /// Room the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<String>,
    /// Sender's member id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    /// Sender's display name
    pub sender_nickname: String,
    /// Message body
    pub content: String,
    /// Content kind, `None` when the server omits it
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    /// Server timestamp
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Sender's avatar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar_url: Option<String>,
    /// Correlation id copied from the publish, when the server echoes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Body published to `/app/{roomId}/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Message body
    pub content: String,
    /// Content kind
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    /// Client-generated correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Room entry from the room listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    /// Opaque room token
    pub id: String,
    /// Display name
    pub name: String,
    /// Members currently in the room
    #[serde(default)]
    pub current_participants: u32,
    /// Room capacity
    #[serde(default)]
    pub max_participants: u32,
    /// Group or direct
    #[serde(default, rename = "type")]
    pub kind: Option<RoomKind>,
    /// Time of the latest message
    #[serde(default, with = "timestamp::option")]
    pub last_send_at: Option<DateTime<Utc>>,
    /// Body of the latest message
    #[serde(default)]
    pub last_content: Option<String>,
    /// Kind of the latest message
    #[serde(default)]
    pub last_type: Option<MessageKind>,
    /// Peer nickname (direct rooms)
    #[serde(default)]
    pub nickname: Option<String>,
    /// Peer avatar (direct rooms)
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Current user's profile from `/profile/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDto {
    /// Login name
    #[serde(default)]
    pub username: Option<String>,
    /// Display name, matched against `senderNickname`
    pub nickname: String,
    /// Avatar URL
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Timestamps as either RFC 3339 strings, zone-less local date-times (read as
/// UTC), or epoch seconds with an optional fraction.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(f64),
    }

    /// Serialize as RFC 3339.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339())
    }

    /// Deserialize from any accepted representation.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Text(text) => parse_text(&text).ok_or_else(|| {
                D::Error::custom(format!("unrecognised timestamp {text:?}"))
            }),
            Raw::Seconds(secs) => from_epoch_seconds(secs)
                .ok_or_else(|| D::Error::custom(format!("timestamp {secs} out of range"))),
        }
    }

    fn parse_text(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|naive| naive.and_utc())
    }

    fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round() as u32;
        DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
    }

    /// Optional variant for nullable fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super")] DateTime<Utc>);

        /// Serialize `Some` as RFC 3339 and `None` as null.
        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, s),
                None => s.serialize_none(),
            }
        }

        /// Deserialize null or any accepted timestamp.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Ok(Option::<Wrapped>::deserialize(d)?.map(|Wrapped(value)| value))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn decode_broadcast_message() {
        let json = r#"{
            "id": 17,
            "chatRoomId": "0b8e9a2e-0000-4000-8000-000000000001",
            "senderId": 3,
            "senderNickname": "runner",
            "content": "hi",
            "type": "TEXT",
            "timestamp": "2024-05-01T10:00:00Z",
            "senderAvatarUrl": null
        }"#;

        let dto: ChatMessageDto = serde_json::from_str(json).unwrap();
        assert_eq!(dto.id, 17);
        assert_eq!(dto.sender_id, Some(3));
        assert_eq!(dto.kind, Some(MessageKind::Text));
        assert_eq!(dto.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert_eq!(dto.sender_avatar_url, None);
        assert_eq!(dto.client_message_id, None);
    }

    #[test]
    fn decode_epoch_seconds_timestamp() {
        let json = r#"{"id":1,"senderNickname":"a","content":"x","timestamp":1714557600.5}"#;
        let dto: ChatMessageDto = serde_json::from_str(json).unwrap();

        assert_eq!(dto.timestamp.timestamp(), 1_714_557_600);
        assert_eq!(dto.timestamp.timestamp_subsec_millis(), 500);
        assert_eq!(dto.kind, None);
    }

    #[test]
    fn decode_local_datetime_as_utc() {
        let json = r#"{"id":1,"senderNickname":"a","content":"x","timestamp":"2024-05-01T10:00:00.250"}"#;
        let dto: ChatMessageDto = serde_json::from_str(json).unwrap();
        assert_eq!(dto.timestamp.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn unknown_message_kind_does_not_fail() {
        let json = r#"{"id":1,"senderNickname":"a","content":"x","type":"STICKER","timestamp":0}"#;
        let dto: ChatMessageDto = serde_json::from_str(json).unwrap();
        assert_eq!(dto.kind, Some(MessageKind::Unknown));
    }

    #[test]
    fn outgoing_omits_absent_fields() {
        let body = OutgoingMessage { content: "yo".into(), kind: None, client_message_id: None };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"content":"yo"}"#);

        let body = OutgoingMessage {
            content: "yo".into(),
            kind: Some(MessageKind::Text),
            client_message_id: Some("c-1".into()),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"content":"yo","type":"TEXT","clientMessageId":"c-1"}"#
        );
    }

    #[test]
    fn decode_direct_room_summary() {
        let json = r#"{
            "id": "r-9",
            "name": "dm",
            "maxParticipants": 2,
            "currentParticipants": 2,
            "type": "DIRECT",
            "lastSendAt": null,
            "lastContent": null,
            "lastType": null,
            "nickname": "pacer",
            "avatarUrl": "/img/p.png"
        }"#;

        let room: RoomSummary = serde_json::from_str(json).unwrap();
        assert_eq!(room.kind, Some(RoomKind::Direct));
        assert_eq!(room.last_send_at, None);
        assert_eq!(room.nickname.as_deref(), Some("pacer"));
    }

    #[test]
    fn decode_group_room_with_last_message() {
        let json = r#"{"id":"r-1","name":"crew","type":"GROUP","lastSendAt":"2024-05-01T10:00:00Z","lastContent":"go","lastType":"TEXT"}"#;
        let room: RoomSummary = serde_json::from_str(json).unwrap();

        assert_eq!(room.current_participants, 0);
        assert_eq!(room.last_send_at, Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        assert_eq!(room.last_type, Some(MessageKind::Text));
    }
}
