//! Ordered message sequence of the open room.
//!
//! # Invariants
//!
//! - Arrival Order: history comes first (oldest to newest), followed by live
//!   arrivals in the order they were appended.
//! - Stable Position: reconciling or changing the delivery state of an entry
//!   never moves it.
//! - Unique Server Ids: no two entries share a server id.

use std::collections::HashSet;

use crate::message::{ChatMessage, DeliveryState, LocalId, MessageId};

/// Ordered, de-duplicated message list for one room view.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    server_ids: HashSet<i64>,
}

impl MessageStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    ///
    /// Returns `false` (and drops the message) if its server id is already
    /// present.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if let MessageId::Server(id) = message.id
            && !self.server_ids.insert(id)
        {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Place a history page before the live entries.
    ///
    /// `newest_first` is the backend's order; it is reversed so the sequence
    /// reads oldest to newest. Live entries whose server id appears in the
    /// history are dropped in favour of the history copy.
    pub fn load_history(&mut self, newest_first: Vec<ChatMessage>) {
        let mut history: Vec<ChatMessage> = Vec::with_capacity(newest_first.len());
        let mut seen = HashSet::new();
        for message in newest_first.into_iter().rev() {
            if let MessageId::Server(id) = message.id
                && !seen.insert(id)
            {
                continue;
            }
            history.push(message);
        }

        let live = std::mem::take(&mut self.messages);
        history.extend(live.into_iter().filter(|m| match m.id {
            MessageId::Server(id) => !seen.contains(&id),
            MessageId::Local(_) => true,
        }));

        seen.extend(self.server_ids.drain());
        self.server_ids = seen;
        self.messages = history;
    }

    /// Replace the entry with `local_id` in place.
    ///
    /// Returns `false` if no such entry exists. If `confirmed` carries a server
    /// id already present elsewhere, the local entry is removed instead so the
    /// id stays unique.
    pub fn reconcile(&mut self, local_id: LocalId, confirmed: ChatMessage) -> bool {
        let Some(index) = self.position(MessageId::Local(local_id)) else {
            return false;
        };

        if let MessageId::Server(id) = confirmed.id
            && !self.server_ids.insert(id)
        {
            self.messages.remove(index);
            return true;
        }

        if let Some(slot) = self.messages.get_mut(index) {
            *slot = confirmed;
        }
        true
    }

    /// Take the entry with `id` out of the sequence.
    pub fn remove(&mut self, id: MessageId) -> Option<ChatMessage> {
        let index = self.position(id)?;
        if let MessageId::Server(server_id) = id {
            self.server_ids.remove(&server_id);
        }
        Some(self.messages.remove(index))
    }

    /// Set the delivery state of a local entry. Returns `false` if not found.
    pub fn set_delivery(&mut self, local_id: LocalId, delivery: DeliveryState) -> bool {
        match self.get_mut(MessageId::Local(local_id)) {
            Some(message) => {
                message.delivery = delivery;
                true
            },
            None => false,
        }
    }

    /// Mark a local entry as failed.
    pub fn mark_failed(&mut self, local_id: LocalId) -> bool {
        self.set_delivery(local_id, DeliveryState::Failed)
    }

    /// Mark a local entry as pending again (retry).
    pub fn mark_pending(&mut self, local_id: LocalId) -> bool {
        self.set_delivery(local_id, DeliveryState::Pending)
    }

    /// Entry with `id`.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Display position of the entry with `id`.
    #[must_use]
    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Whether a confirmed entry with this server id exists.
    #[must_use]
    pub fn contains_server_id(&self, id: i64) -> bool {
        self.server_ids.contains(&id)
    }

    /// Entries in display order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Entries as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.server_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::room::RoomId;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn server(id: i64, content: &str) -> ChatMessage {
        let mut m = ChatMessage::pending(LocalId::new(0), RoomId::new("r"), None, content, at(id));
        m.id = MessageId::Server(id);
        m.delivery = DeliveryState::Confirmed;
        m
    }

    fn local(id: u64, content: &str) -> ChatMessage {
        ChatMessage::pending(LocalId::new(id), RoomId::new("r"), None, content, at(0))
    }

    fn contents(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn append_keeps_arrival_order() {
        let mut store = MessageStore::new();
        store.append(server(1, "a"));
        store.append(local(1, "b"));
        store.append(server(2, "c"));

        assert_eq!(contents(&store), ["a", "b", "c"]);
    }

    #[test]
    fn append_drops_duplicate_server_id() {
        let mut store = MessageStore::new();
        assert!(store.append(server(1, "a")));
        assert!(!store.append(server(1, "a again")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn history_is_reversed_and_goes_first() {
        let mut store = MessageStore::new();
        store.append(server(10, "live"));
        store.load_history(vec![server(3, "m3"), server(2, "m2"), server(1, "m1")]);

        assert_eq!(contents(&store), ["m1", "m2", "m3", "live"]);
    }

    #[test]
    fn history_replaces_live_duplicates() {
        let mut store = MessageStore::new();
        store.append(server(3, "live copy"));
        store.append(local(1, "pending"));
        store.load_history(vec![server(3, "m3"), server(2, "m2")]);

        assert_eq!(contents(&store), ["m2", "m3", "pending"]);
        assert!(store.contains_server_id(3));
        assert!(!store.append(server(2, "dup")));
    }

    #[test]
    fn reconcile_preserves_position() {
        let mut store = MessageStore::new();
        store.append(local(1, "mine"));
        store.append(server(7, "theirs"));

        assert!(store.reconcile(LocalId::new(1), server(8, "mine")));
        assert_eq!(store.position(MessageId::Server(8)), Some(0));
        assert_eq!(store.get(MessageId::Local(LocalId::new(1))), None);
        assert!(!store.reconcile(LocalId::new(1), server(9, "again")));
    }

    #[test]
    fn reconcile_with_known_server_id_removes_local() {
        let mut store = MessageStore::new();
        store.append(server(8, "mine"));
        store.append(local(1, "mine"));

        assert!(store.reconcile(LocalId::new(1), server(8, "mine")));
        assert_eq!(contents(&store), ["mine"]);
    }

    #[test]
    fn remove_releases_server_id() {
        let mut store = MessageStore::new();
        store.append(server(4, "a"));
        store.append(server(5, "b"));

        assert_eq!(store.remove(MessageId::Server(4)).map(|m| m.content), Some("a".to_string()));
        assert_eq!(store.remove(MessageId::Server(4)), None);
        assert!(!store.contains_server_id(4));
        assert_eq!(contents(&store), ["b"]);
    }

    #[test]
    fn delivery_transitions() {
        let mut store = MessageStore::new();
        store.append(local(1, "x"));

        assert!(store.mark_failed(LocalId::new(1)));
        assert!(store.get(MessageId::Local(LocalId::new(1))).unwrap().is_failed());
        assert!(store.mark_pending(LocalId::new(1)));
        assert!(store.get(MessageId::Local(LocalId::new(1))).unwrap().is_pending());
        assert!(!store.mark_failed(LocalId::new(2)));
    }

    #[test]
    fn clear_forgets_server_ids() {
        let mut store = MessageStore::new();
        store.append(server(1, "a"));
        store.clear();

        assert!(store.is_empty());
        assert!(store.append(server(1, "a")));
    }
}
