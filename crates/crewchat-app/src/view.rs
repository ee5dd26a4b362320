//! Observable view state of the open room.
//!
//! [`ChatView`] is the view model a frontend renders: the ordered messages,
//! the connection banner and the enabled state of the send control. It
//! contains no protocol state; the runtime updates it from client actions.

use crewchat_client::{
    ChatMessage, ClientAction, DeliveryState, FetchError, RoomId, SessionState,
};

/// View model of one chat room screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    /// Room on screen. `None` before open and after close.
    pub room_id: Option<RoomId>,
    /// Connection state.
    pub state: SessionState,
    /// Messages in display order.
    pub messages: Vec<ChatMessage>,
    /// Token missing or rejected; the frontend should go back to sign-in.
    pub auth_required: bool,
    /// History could not be loaded. Shown inline, never retried.
    pub history_error: Option<String>,
    /// Transient status line. `None` if nothing to say.
    pub notice: Option<String>,
}

impl Default for ChatView {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatView {
    /// Empty view with no room.
    pub fn new() -> Self {
        Self {
            room_id: None,
            state: SessionState::Disconnected,
            messages: Vec::new(),
            auth_required: false,
            history_error: None,
            notice: None,
        }
    }

    /// Send control is enabled only while connected.
    pub fn send_enabled(&self) -> bool {
        self.room_id.is_some() && self.state.is_connected()
    }

    /// Connection banner. `None` while connected or with no room.
    pub fn banner(&self) -> Option<String> {
        self.room_id.as_ref()?;
        match self.state {
            SessionState::Connected => None,
            SessionState::Connecting => Some("Connecting...".to_string()),
            SessionState::Reconnecting { attempt } => {
                Some(format!("Connection lost, reconnecting (attempt {attempt})..."))
            },
            SessionState::Disconnected => Some("Disconnected".to_string()),
        }
    }

    /// Messages that failed and can be retried, with their display index.
    pub fn failed(&self) -> impl Iterator<Item = (usize, &ChatMessage)> {
        self.messages.iter().enumerate().filter(|(_, m)| m.delivery == DeliveryState::Failed)
    }

    /// Set a status message.
    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    /// The profile could not be loaded. Own messages are only recognised by
    /// correlation id until it is.
    pub fn profile_failed(&mut self, err: &FetchError) {
        self.auth_required |= err.is_auth();
        self.notice = Some(format!("Profile unavailable: {err}"));
    }

    /// Replace the message list.
    pub fn set_messages(&mut self, messages: &[ChatMessage]) {
        self.messages = messages.to_vec();
    }

    /// Reset for a newly opened room.
    pub fn open(&mut self, room_id: RoomId) {
        *self = Self { room_id: Some(room_id), ..Self::new() };
    }

    /// Apply a client action. Returns `true` if the view changed.
    ///
    /// `MessagesChanged` is not handled here: the message list lives in the
    /// client and is copied with [`Self::set_messages`].
    pub fn apply(&mut self, action: &ClientAction) -> bool {
        match action {
            ClientAction::StateChanged(state) => {
                self.state = *state;
                true
            },
            ClientAction::RoomOpened { resumed, .. } => {
                self.auth_required = false;
                self.notice = resumed.then(|| "Reconnected".to_string());
                true
            },
            ClientAction::OpenFailed(err) | ClientAction::SessionEnded(err) => {
                self.auth_required |= err.is_auth();
                self.notice = Some(err.to_string());
                true
            },
            ClientAction::DeliveryFailed(local_id) => {
                self.notice = Some(format!("Message {local_id} was not delivered"));
                true
            },
            ClientAction::HistoryFailed(err) => {
                self.auth_required |= err.is_auth();
                self.history_error = Some(err.to_string());
                true
            },
            ClientAction::OpenTransport { .. }
            | ClientAction::SendFrame(_)
            | ClientAction::SendHeartBeat
            | ClientAction::CloseTransport
            | ClientAction::FetchHistory { .. }
            | ClientAction::CancelHistory { .. }
            | ClientAction::MessagesChanged
            | ClientAction::Log { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crewchat_core::SessionError;

    use super::*;

    fn open_view() -> ChatView {
        let mut view = ChatView::new();
        view.open(RoomId::new("r1"));
        view
    }

    #[test]
    fn send_enabled_only_when_connected() {
        let mut view = open_view();

        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Reconnecting { attempt: 1 },
        ] {
            view.apply(&ClientAction::StateChanged(state));
            assert!(!view.send_enabled(), "{state:?}");
            assert!(view.banner().is_some());
        }

        view.apply(&ClientAction::StateChanged(SessionState::Connected));
        assert!(view.send_enabled());
        assert_eq!(view.banner(), None);
    }

    #[test]
    fn no_room_means_no_banner() {
        let view = ChatView::new();
        assert!(!view.send_enabled());
        assert_eq!(view.banner(), None);
    }

    #[test]
    fn reconnect_banner_names_attempt() {
        let mut view = open_view();
        view.apply(&ClientAction::StateChanged(SessionState::Reconnecting { attempt: 3 }));
        assert!(view.banner().is_some_and(|b| b.contains("attempt 3")));
    }

    #[test]
    fn auth_failure_requires_sign_in() {
        let mut view = open_view();
        view.apply(&ClientAction::OpenFailed(SessionError::Auth("bad jwt".into())));
        assert!(view.auth_required);

        let mut view = open_view();
        view.apply(&ClientAction::OpenFailed(SessionError::Connect("refused".into())));
        assert!(!view.auth_required);
        assert!(view.notice.is_some());
    }

    #[test]
    fn history_failure_is_inline() {
        let mut view = open_view();
        view.apply(&ClientAction::HistoryFailed(FetchError::Failed("HTTP 500".into())));

        assert!(view.history_error.as_deref().is_some_and(|e| e.contains("HTTP 500")));
        assert!(!view.auth_required);
    }

    #[test]
    fn profile_failure_sets_notice() {
        let mut view = open_view();
        view.profile_failed(&FetchError::Failed("HTTP 502".into()));
        assert!(view.notice.as_deref().is_some_and(|n| n.contains("HTTP 502")));
        assert!(!view.auth_required);

        view.profile_failed(&FetchError::Unauthorized("HTTP 401".into()));
        assert!(view.auth_required);
    }

    #[test]
    fn io_actions_do_not_change_view() {
        let mut view = open_view();
        let before = view.clone();

        assert!(!view.apply(&ClientAction::SendHeartBeat));
        assert!(!view.apply(&ClientAction::CloseTransport));
        assert_eq!(view, before);
    }
}
