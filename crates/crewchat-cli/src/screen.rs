//! Line-oriented rendering of the room view.
//!
//! A terminal that only scrolls cannot redraw, so [`Screen`] remembers what it
//! already printed and writes only what changed: new messages, delivery state
//! changes of earlier ones, and banner or notice updates.

use std::io::{self, Write};

use crewchat_app::ChatView;
use crewchat_client::{ChatMessage, DeliveryState, LocalId, MessageId};

/// What has been printed so far.
#[derive(Debug, Default)]
pub struct Screen {
    shown: Vec<(MessageId, DeliveryState)>,
    banner: Option<String>,
    notice: Option<String>,
    history_error: Option<String>,
    auth_required: bool,
}

impl Screen {
    /// Screen with nothing printed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the changes between the last rendered view and `view`.
    pub fn render(&mut self, view: &ChatView, out: &mut impl Write) -> io::Result<()> {
        let banner = view.banner();
        if banner != self.banner {
            match &banner {
                Some(text) => writeln!(out, "-- {text} --")?,
                None if self.banner.is_some() => writeln!(out, "-- Connected --")?,
                None => {},
            }
            self.banner = banner;
        }

        if view.history_error != self.history_error {
            if let Some(err) = &view.history_error {
                writeln!(out, "!! could not load history: {err}")?;
            }
            self.history_error.clone_from(&view.history_error);
        }

        self.render_messages(&view.messages, out)?;

        if view.notice != self.notice {
            if let Some(notice) = &view.notice {
                writeln!(out, "** {notice}")?;
            }
            self.notice.clone_from(&view.notice);
        }

        if view.auth_required && !self.auth_required {
            writeln!(out, "!! sign in again: the token was rejected or is missing")?;
        }
        self.auth_required = view.auth_required;

        out.flush()
    }

    fn render_messages(&mut self, messages: &[ChatMessage], out: &mut impl Write) -> io::Result<()> {
        // Confirmation swaps the id, so positions are the stable key.
        if messages.len() < self.shown.len() {
            self.shown.clear();
        }

        for (index, message) in messages.iter().enumerate() {
            let state = (message.id, message.delivery);
            match self.shown.get_mut(index) {
                Some(seen) if *seen == state => {},
                Some(seen) => {
                    if message.delivery != DeliveryState::Confirmed || seen.1 == DeliveryState::Failed {
                        writeln!(out, "{}", format_message(index, message))?;
                    }
                    *seen = state;
                },
                None => {
                    writeln!(out, "{}", format_message(index, message))?;
                    self.shown.push(state);
                },
            }
        }
        Ok(())
    }
}

/// One display line: `[n] HH:MM sender: content`, plus the delivery marker.
pub fn format_message(index: usize, message: &ChatMessage) -> String {
    let number = index + 1;
    let time = message.timestamp.format("%H:%M");
    let marker = match message.delivery {
        DeliveryState::Confirmed => String::new(),
        DeliveryState::Pending => " (sending)".to_string(),
        DeliveryState::Failed => format!(" (not delivered, /retry {number})"),
    };
    format!("[{number}] {time} {}: {}{marker}", message.sender_nickname, message.content)
}

/// Local id of the failed message shown as number `number`.
pub fn failed_at(view: &ChatView, number: usize) -> Option<LocalId> {
    let message = view.messages.get(number.checked_sub(1)?)?;
    if message.delivery != DeliveryState::Failed {
        return None;
    }
    message.id.local()
}
