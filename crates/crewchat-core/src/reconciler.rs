//! Optimistic sends and echo reconciliation.
//!
//! A send appends a Pending entry to the store immediately and hands back the
//! body to publish. The server broadcasts every persisted message on the room
//! topic, including our own; that echo is matched back to the Pending entry
//! and replaces it in place.
//!
//! # Matching
//!
//! 1. An echo carrying a `clientMessageId` of an outstanding send confirms
//!    that send.
//! 2. Otherwise, if the echo was sent by the current user, the oldest
//!    outstanding Pending entry with equal content is confirmed.
//! 3. Failing that, the oldest Failed entry with equal content is confirmed
//!    (the echo arrived after the send timeout).
//! 4. Anything else is appended as a new Confirmed entry.
//!
//! History pages go through the same matching, which settles a send whose
//! message is listed in history before its echo arrives. A history entry only
//! matches by content if it is stamped no earlier than the send (less
//! [`CLOCK_SKEW_SECS`]), so an old message never claims a new send.
//!
//! Until the profile is known only correlation ids match. Entries placed in
//! the meantime are matched again once [`DeliveryReconciler::set_profile`]
//! provides one.
//!
//! # Invariants
//!
//! - No Duplicates: an outstanding send and its echo never coexist as two
//!   entries.
//! - FIFO: equal-content sends are confirmed in send order.

use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use crewchat_proto::payloads::{ChatMessageDto, MessageKind, OutgoingMessage};

use crate::{
    env::Moment,
    error::SendError,
    message::{ChatMessage, DeliveryState, LocalId, MessageId},
    room::{Profile, RoomId},
    store::MessageStore,
};

/// Time a send may stay Pending before it is marked Failed.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Tolerated difference between the local clock and server timestamps.
pub const CLOCK_SKEW_SECS: i64 = 60;

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time a send may stay Pending before it is marked Failed
    pub send_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { send_timeout: DEFAULT_SEND_TIMEOUT }
    }
}

/// A body ready to publish for a local entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Entry the publish belongs to
    pub local_id: LocalId,
    /// JSON body for the send destination
    pub body: OutgoingMessage,
}

/// Result of feeding a broadcast message to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// An outstanding send was confirmed in place
    Confirmed {
        /// Former local id
        local_id: LocalId,
        /// Assigned server id
        server_id: i64,
    },
    /// A message from someone else (or unmatched) was appended
    Appended(i64),
    /// The server id is already in the store
    Duplicate(i64),
}

/// Where a confirmed message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Live,
    History,
}

#[derive(Debug, Clone)]
struct Outstanding<I> {
    local_id: LocalId,
    correlation: String,
    content: String,
    sent_at: I,
    created: DateTime<Utc>,
}

/// Delivery reconciler for one room view.
///
/// Owns the room's [`MessageStore`]; every mutation of message delivery state
/// goes through here.
#[derive(Debug, Clone)]
pub struct DeliveryReconciler<I: Moment> {
    config: ReconcilerConfig,
    room_id: RoomId,
    profile: Option<Profile>,
    store: MessageStore,
    /// Sends without an echo yet, oldest first. Includes Failed entries.
    outstanding: Vec<Outstanding<I>>,
    /// Server ids placed while no profile was known and not matched.
    unclaimed: Vec<(i64, Source)>,
    next_local_id: u64,
}

impl<I: Moment> DeliveryReconciler<I> {
    /// Reconciler for `room_id` with an empty store.
    pub fn new(room_id: RoomId, config: ReconcilerConfig) -> Self {
        Self {
            config,
            room_id,
            profile: None,
            store: MessageStore::new(),
            outstanding: Vec::new(),
            unclaimed: Vec::new(),
            next_local_id: 1,
        }
    }

    /// Room this reconciler serves.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Set the current user's profile for sender matching.
    ///
    /// Messages placed while no profile was known are matched against
    /// outstanding sends again. Returns `true` if that confirmed any.
    pub fn set_profile(&mut self, profile: Option<Profile>) -> bool {
        self.profile = profile;
        if self.profile.is_none() {
            return false;
        }

        let mut changed = false;
        for (server_id, source) in std::mem::take(&mut self.unclaimed) {
            let Some(message) = self.store.get(MessageId::Server(server_id)) else {
                continue;
            };
            let Some(index) = self.match_outstanding(None, message, source) else {
                continue;
            };

            // A live message shown above the send cannot be its echo.
            let local = MessageId::Local(self.outstanding[index].local_id);
            if source == Source::Live
                && self.store.position(local) > self.store.position(MessageId::Server(server_id))
            {
                continue;
            }

            let entry = self.outstanding.remove(index);
            if let Some(message) = self.store.remove(MessageId::Server(server_id)) {
                changed |= self.store.reconcile(entry.local_id, message);
            }
        }
        changed
    }

    /// Message store.
    #[must_use]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Number of sends awaiting an echo (Pending or Failed).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Create a Pending entry for `text` and return the body to publish.
    ///
    /// `correlation` is echoed back by servers that support it and takes
    /// precedence over content matching.
    ///
    /// # Errors
    ///
    /// - `SendError::Empty` if `text` is empty or whitespace only; nothing is
    ///   appended
    pub fn send(
        &mut self,
        text: &str,
        correlation: String,
        now: I,
        at: DateTime<Utc>,
    ) -> Result<Outgoing, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::Empty);
        }

        let local_id = LocalId::new(self.next_local_id);
        self.next_local_id += 1;

        let message =
            ChatMessage::pending(local_id, self.room_id.clone(), self.profile.as_ref(), text, at);
        self.store.append(message);
        self.outstanding.push(Outstanding {
            local_id,
            correlation: correlation.clone(),
            content: text.to_string(),
            sent_at: now,
            created: at,
        });

        Ok(Outgoing { local_id, body: body(text, correlation) })
    }

    /// Return a Failed entry to Pending in place and rebuild its body.
    ///
    /// # Errors
    ///
    /// - `SendError::UnknownMessage` if `local_id` is not outstanding
    /// - `SendError::NotFailed` if the entry is still Pending
    pub fn retry(&mut self, local_id: LocalId, now: I) -> Result<Outgoing, SendError> {
        let entry = self
            .outstanding
            .iter_mut()
            .find(|o| o.local_id == local_id)
            .ok_or(SendError::UnknownMessage(local_id))?;

        let failed = self.store.get(MessageId::Local(local_id)).is_some_and(ChatMessage::is_failed);
        if !failed {
            return Err(SendError::NotFailed(local_id));
        }

        entry.sent_at = now;
        self.store.mark_pending(local_id);

        Ok(Outgoing { local_id, body: body(&entry.content, entry.correlation.clone()) })
    }

    /// Feed a message broadcast on the room topic.
    pub fn on_echo(&mut self, dto: ChatMessageDto) -> EchoOutcome {
        let server_id = dto.id;
        let correlation = dto.client_message_id.clone();
        let message = ChatMessage::confirmed(&self.room_id, dto);

        if self.store.contains_server_id(server_id) {
            // Already listed by history: the send it answers is settled too.
            if let Some(index) = correlation.as_deref().and_then(|c| self.correlated(c)) {
                let entry = self.outstanding.remove(index);
                self.store.reconcile(entry.local_id, message);
            }
            return EchoOutcome::Duplicate(server_id);
        }

        match self.match_outstanding(correlation.as_deref(), &message, Source::Live) {
            Some(index) => {
                let entry = self.outstanding.remove(index);
                self.store.reconcile(entry.local_id, message);
                EchoOutcome::Confirmed { local_id: entry.local_id, server_id }
            },
            None => {
                if self.profile.is_none() {
                    self.unclaimed.push((server_id, Source::Live));
                }
                self.store.append(message);
                EchoOutcome::Appended(server_id)
            },
        }
    }

    fn correlated(&self, correlation: &str) -> Option<usize> {
        self.outstanding.iter().position(|o| o.correlation == correlation)
    }

    fn match_outstanding(
        &self,
        correlation: Option<&str>,
        message: &ChatMessage,
        source: Source,
    ) -> Option<usize> {
        if let Some(index) = correlation.and_then(|c| self.correlated(c)) {
            return Some(index);
        }

        let profile = self.profile.as_ref()?;
        if !profile.is_sender(&message.sender_nickname) {
            return None;
        }

        let skew = TimeDelta::seconds(CLOCK_SKEW_SECS);
        let with_state = |state: DeliveryState| {
            self.outstanding.iter().position(|o| {
                o.content == message.content
                    && (source == Source::Live || message.timestamp >= o.created - skew)
                    && self
                        .store
                        .get(MessageId::Local(o.local_id))
                        .is_some_and(|m| m.delivery == state)
            })
        };

        with_state(DeliveryState::Pending).or_else(|| with_state(DeliveryState::Failed))
    }

    /// Place a history page (newest first) before live entries.
    ///
    /// Entries that answer an outstanding send confirm it in place instead.
    pub fn load_history(&mut self, newest_first: Vec<ChatMessageDto>) {
        let mut seen = HashSet::new();
        let mut history = Vec::with_capacity(newest_first.len());

        // Oldest first so equal-content sends resolve in send order.
        for dto in newest_first.into_iter().rev() {
            let server_id = dto.id;
            let correlation = dto.client_message_id.clone();
            let message = ChatMessage::confirmed(&self.room_id, dto);

            if seen.insert(server_id)
                && !self.store.contains_server_id(server_id)
                && let Some(index) =
                    self.match_outstanding(correlation.as_deref(), &message, Source::History)
            {
                let entry = self.outstanding.remove(index);
                self.store.reconcile(entry.local_id, message);
                continue;
            }

            if self.profile.is_none() {
                self.unclaimed.push((server_id, Source::History));
            }
            history.push(message);
        }

        history.reverse();
        self.store.load_history(history);
    }

    /// Mark sends Pending for longer than the timeout as Failed.
    ///
    /// Returns the entries that failed on this call.
    pub fn expire(&mut self, now: I) -> Vec<LocalId> {
        let timeout = self.config.send_timeout;
        let mut failed = Vec::new();

        for entry in &self.outstanding {
            let pending =
                self.store.get(MessageId::Local(entry.local_id)).is_some_and(ChatMessage::is_pending);
            if pending && now >= entry.sent_at + timeout {
                failed.push(entry.local_id);
            }
        }

        for local_id in &failed {
            self.store.mark_failed(*local_id);
        }
        failed
    }

    /// Earliest instant at which [`Self::expire`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<I> {
        self.outstanding
            .iter()
            .filter(|o| {
                self.store.get(MessageId::Local(o.local_id)).is_some_and(ChatMessage::is_pending)
            })
            .map(|o| o.sent_at + self.config.send_timeout)
            .min()
    }

    /// Drop every entry and outstanding send.
    pub fn clear(&mut self) {
        self.store.clear();
        self.outstanding.clear();
        self.unclaimed.clear();
    }
}

fn body(content: &str, correlation: String) -> OutgoingMessage {
    OutgoingMessage {
        content: content.to_string(),
        kind: Some(MessageKind::Text),
        client_message_id: Some(correlation),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn echo(id: i64, sender: &str, content: &str) -> ChatMessageDto {
        ChatMessageDto {
            id,
            chat_room_id: Some("r".into()),
            sender_id: Some(1),
            sender_nickname: sender.into(),
            content: content.into(),
            kind: Some(MessageKind::Text),
            timestamp: at(),
            sender_avatar_url: None,
            client_message_id: None,
        }
    }

    fn reconciler() -> DeliveryReconciler<Instant> {
        let mut r = DeliveryReconciler::new(RoomId::new("r"), ReconcilerConfig::default());
        r.set_profile(Some(Profile::new("me")));
        r
    }

    fn states(r: &DeliveryReconciler<Instant>) -> Vec<(Option<i64>, DeliveryState)> {
        r.store().iter().map(|m| (m.id.server(), m.delivery)).collect()
    }

    #[test]
    fn empty_text_is_rejected() {
        let mut r = reconciler();
        let now = Instant::now();

        assert_eq!(r.send("", "c1".into(), now, at()), Err(SendError::Empty));
        assert_eq!(r.send(" \t\n", "c2".into(), now, at()), Err(SendError::Empty));
        assert!(r.store().is_empty());
        assert_eq!(r.outstanding(), 0);
    }

    #[test]
    fn send_appends_pending_and_builds_body() {
        let mut r = reconciler();
        let out = r.send("hi", "c1".into(), Instant::now(), at()).unwrap();

        assert_eq!(out.body.content, "hi");
        assert_eq!(out.body.client_message_id.as_deref(), Some("c1"));
        assert_eq!(states(&r), [(None, DeliveryState::Pending)]);
    }

    #[test]
    fn own_echo_collapses_into_one_entry() {
        let mut r = reconciler();
        let out = r.send("hi", "c1".into(), Instant::now(), at()).unwrap();

        let outcome = r.on_echo(echo(42, "me", "hi"));

        assert_eq!(outcome, EchoOutcome::Confirmed { local_id: out.local_id, server_id: 42 });
        assert_eq!(states(&r), [(Some(42), DeliveryState::Confirmed)]);
        assert_eq!(r.outstanding(), 0);
    }

    #[test]
    fn correlation_id_wins_over_fifo() {
        let mut r = reconciler();
        let now = Instant::now();
        let first = r.send("same", "c1".into(), now, at()).unwrap();
        let second = r.send("same", "c2".into(), now, at()).unwrap();

        let mut dto = echo(7, "me", "same");
        dto.client_message_id = Some("c2".into());

        assert_eq!(r.on_echo(dto), EchoOutcome::Confirmed { local_id: second.local_id, server_id: 7 });
        assert_eq!(
            r.on_echo(echo(8, "me", "same")),
            EchoOutcome::Confirmed { local_id: first.local_id, server_id: 8 }
        );
        // positions unchanged: first send still first
        assert_eq!(states(&r), [
            (Some(8), DeliveryState::Confirmed),
            (Some(7), DeliveryState::Confirmed)
        ]);
    }

    #[test]
    fn equal_content_confirms_in_send_order() {
        let mut r = reconciler();
        let now = Instant::now();
        let first = r.send("go", "c1".into(), now, at()).unwrap();
        r.send("go", "c2".into(), now, at()).unwrap();

        assert_eq!(
            r.on_echo(echo(1, "me", "go")),
            EchoOutcome::Confirmed { local_id: first.local_id, server_id: 1 }
        );
        assert_eq!(states(&r), [(Some(1), DeliveryState::Confirmed), (None, DeliveryState::Pending)]);
    }

    #[test]
    fn foreign_echo_with_same_content_is_appended() {
        let mut r = reconciler();
        r.send("hi", "c1".into(), Instant::now(), at()).unwrap();

        assert_eq!(r.on_echo(echo(9, "someone", "hi")), EchoOutcome::Appended(9));
        assert_eq!(states(&r), [(None, DeliveryState::Pending), (Some(9), DeliveryState::Confirmed)]);
    }

    #[test]
    fn foreign_echo_before_profile_is_appended() {
        let mut r: DeliveryReconciler<Instant> =
            DeliveryReconciler::new(RoomId::new("r"), ReconcilerConfig::default());
        r.send("ok", "c1".into(), Instant::now(), at()).unwrap();

        assert_eq!(r.on_echo(echo(9, "bob", "ok")), EchoOutcome::Appended(9));
        assert_eq!(r.outstanding(), 1);

        // bob's message stays bob's once we know who we are
        assert!(!r.set_profile(Some(Profile::new("me"))));
        assert_eq!(states(&r), [(None, DeliveryState::Pending), (Some(9), DeliveryState::Confirmed)]);
        assert_eq!(r.store().get(MessageId::Server(9)).unwrap().sender_nickname, "bob");
    }

    #[test]
    fn own_echo_before_profile_is_claimed_later() {
        let mut r: DeliveryReconciler<Instant> =
            DeliveryReconciler::new(RoomId::new("r"), ReconcilerConfig::default());
        let out = r.send("ok", "c1".into(), Instant::now(), at()).unwrap();
        r.on_echo(echo(9, "bob", "ok"));
        r.on_echo(echo(10, "me", "ok"));
        assert_eq!(r.store().len(), 3);

        assert!(r.set_profile(Some(Profile::new("me"))));

        assert_eq!(states(&r), [
            (Some(10), DeliveryState::Confirmed),
            (Some(9), DeliveryState::Confirmed)
        ]);
        assert_eq!(r.outstanding(), 0);
        assert_eq!(r.store().position(MessageId::Server(10)), Some(0), "kept the send's slot");
        assert!(r.retry(out.local_id, Instant::now()).is_err());
    }

    #[test]
    fn history_listing_a_pending_send_confirms_it() {
        let mut r = reconciler();
        let start = Instant::now();
        let out = r.send("yo", "c1".into(), start, at()).unwrap();

        r.load_history(vec![echo(7, "me", "yo"), echo(1, "a", "hi")]);
        assert_eq!(states(&r), [
            (Some(1), DeliveryState::Confirmed),
            (Some(7), DeliveryState::Confirmed)
        ]);

        let mut late = echo(7, "me", "yo");
        late.client_message_id = Some("c1".into());
        assert_eq!(r.on_echo(late), EchoOutcome::Duplicate(7));
        assert_eq!(r.outstanding(), 0);

        assert!(r.expire(start + DEFAULT_SEND_TIMEOUT).is_empty());
        assert_eq!(r.store().len(), 2);
        assert!(r.retry(out.local_id, start).is_err());
    }

    #[test]
    fn correlated_echo_settles_send_already_in_history() {
        let mut r: DeliveryReconciler<Instant> =
            DeliveryReconciler::new(RoomId::new("r"), ReconcilerConfig::default());
        r.send("yo", "c1".into(), Instant::now(), at()).unwrap();
        r.load_history(vec![echo(7, "me", "yo")]);
        assert_eq!(r.store().len(), 2);

        let mut late = echo(7, "me", "yo");
        late.client_message_id = Some("c1".into());

        assert_eq!(r.on_echo(late), EchoOutcome::Duplicate(7));
        assert_eq!(states(&r), [(Some(7), DeliveryState::Confirmed)]);
        assert_eq!(r.outstanding(), 0);
    }

    #[test]
    fn old_history_entry_does_not_claim_new_send() {
        let mut r = reconciler();
        r.send("ok", "c1".into(), Instant::now(), at()).unwrap();

        let mut yesterday = echo(3, "me", "ok");
        yesterday.timestamp = at() - TimeDelta::days(1);
        r.load_history(vec![yesterday]);

        assert_eq!(states(&r), [(Some(3), DeliveryState::Confirmed), (None, DeliveryState::Pending)]);
        assert_eq!(r.outstanding(), 1);
    }

    #[test]
    fn duplicate_broadcast_is_ignored() {
        let mut r = reconciler();
        r.on_echo(echo(5, "x", "a"));
        assert_eq!(r.on_echo(echo(5, "x", "a")), EchoOutcome::Duplicate(5));
        assert_eq!(r.store().len(), 1);
    }

    #[test]
    fn timeout_marks_failed_then_retry_returns_to_pending() {
        let mut r = reconciler();
        let start = Instant::now();
        let out = r.send("hi", "c1".into(), start, at()).unwrap();

        assert_eq!(r.next_deadline(), Some(start + DEFAULT_SEND_TIMEOUT));
        assert!(r.expire(start + Duration::from_secs(9)).is_empty());
        assert_eq!(r.expire(start + DEFAULT_SEND_TIMEOUT), [out.local_id]);
        assert_eq!(states(&r), [(None, DeliveryState::Failed)]);
        assert_eq!(r.next_deadline(), None);

        let later = start + Duration::from_secs(20);
        let again = r.retry(out.local_id, later).unwrap();
        assert_eq!(again.body, out.body);
        assert_eq!(states(&r), [(None, DeliveryState::Pending)]);
        assert_eq!(r.next_deadline(), Some(later + DEFAULT_SEND_TIMEOUT));
    }

    #[test]
    fn retry_rejects_pending_and_unknown() {
        let mut r = reconciler();
        let now = Instant::now();
        let out = r.send("hi", "c1".into(), now, at()).unwrap();

        assert_eq!(r.retry(out.local_id, now), Err(SendError::NotFailed(out.local_id)));
        assert_eq!(
            r.retry(LocalId::new(99), now),
            Err(SendError::UnknownMessage(LocalId::new(99)))
        );
    }

    #[test]
    fn late_echo_confirms_failed_entry() {
        let mut r = reconciler();
        let start = Instant::now();
        let out = r.send("hi", "c1".into(), start, at()).unwrap();
        r.expire(start + DEFAULT_SEND_TIMEOUT);

        assert_eq!(
            r.on_echo(echo(11, "me", "hi")),
            EchoOutcome::Confirmed { local_id: out.local_id, server_id: 11 }
        );
        assert_eq!(states(&r), [(Some(11), DeliveryState::Confirmed)]);
    }

    #[test]
    fn pending_match_is_preferred_over_failed() {
        let mut r = reconciler();
        let start = Instant::now();
        r.send("hi", "c1".into(), start, at()).unwrap();
        r.expire(start + DEFAULT_SEND_TIMEOUT);
        let fresh = r.send("hi", "c2".into(), start + DEFAULT_SEND_TIMEOUT, at()).unwrap();

        assert_eq!(
            r.on_echo(echo(12, "me", "hi")),
            EchoOutcome::Confirmed { local_id: fresh.local_id, server_id: 12 }
        );
    }

    #[test]
    fn history_goes_before_pending_send() {
        let mut r = reconciler();
        r.send("mine", "c1".into(), Instant::now(), at()).unwrap();
        r.load_history(vec![echo(2, "a", "m2"), echo(1, "a", "m1")]);

        let contents: Vec<_> = r.store().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m1", "m2", "mine"]);
    }
}
