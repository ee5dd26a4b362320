//! Broker destinations for a chat room.
//!
//! The backend broadcasts saved messages on `/topic/chat/{roomId}` and accepts
//! publishes on its application prefix at `/app/{roomId}/send`.

/// Prefix of broker-relayed broadcast topics.
pub const TOPIC_PREFIX: &str = "/topic/chat/";

/// Prefix of application (controller-handled) destinations.
pub const APP_PREFIX: &str = "/app/";

/// Topic carrying every message saved in `room_id`.
pub fn room_topic(room_id: &str) -> String {
    format!("{TOPIC_PREFIX}{room_id}")
}

/// Destination that persists and rebroadcasts a message in `room_id`.
pub fn room_send(room_id: &str) -> String {
    format!("{APP_PREFIX}{room_id}/send")
}

/// Room id addressed by a topic destination. `None` for other destinations.
pub fn room_of_topic(destination: &str) -> Option<&str> {
    destination.strip_prefix(TOPIC_PREFIX).filter(|room| !room.is_empty() && !room.contains('/'))
}
