//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` provides the same interface as the terminal driver but for
//! deterministic testing. It implements [`Driver`] so the same
//! [`crewchat_app::Runtime`] orchestration code runs in both production and
//! simulation. The transport is a direct line to a [`SimBroker`]; time is the
//! [`SimEnv`] virtual clock.

use std::{collections::VecDeque, time::Duration};

use crewchat_app::{ChatView, Driver, DriverEvent, Intent};
use crewchat_client::{FetchError, RoomId};
use crewchat_core::Environment;
use crewchat_proto::Frame;
use thiserror::Error;

use crate::{SimBroker, SimEnv, SimInstant};

/// Error type for simulation driver.
#[derive(Debug, Clone, Error)]
#[error("SimDriverError: {0}")]
pub struct SimDriverError(pub String);

/// Something that happens at a fixed virtual time.
#[derive(Debug, Clone)]
pub enum Scheduled {
    /// Deliver an event.
    Event(DriverEvent),
    /// Answer a history request.
    History {
        /// Request being answered
        request_id: u64,
        /// Room requested
        room_id: RoomId,
    },
    /// Kill the transport.
    DropLink {
        /// Reason reported to the client
        reason: String,
    },
    /// Another participant posts to a room.
    Foreign {
        /// Target room
        room_id: RoomId,
        /// Sender nickname
        sender: String,
        /// Text
        content: String,
    },
}

/// Simulation driver for deterministic testing.
pub struct SimDriver {
    env: SimEnv,
    broker: SimBroker,
    pending: VecDeque<DriverEvent>,
    scheduled: Vec<(SimInstant, Scheduled)>,
    link_open: bool,
    network_up: bool,
    history_delay: Duration,
    history_failure: Option<FetchError>,
    opened: Vec<String>,
    heartbeats_sent: usize,
    transport_closes: usize,
    cancelled: Vec<u64>,
    renders: usize,
    last_view: Option<ChatView>,
}

impl SimDriver {
    /// Driver talking to `broker` on the clock of `env`.
    pub fn new(env: SimEnv, broker: SimBroker) -> Self {
        Self {
            env,
            broker,
            pending: VecDeque::new(),
            scheduled: Vec::new(),
            link_open: false,
            network_up: true,
            history_delay: Duration::ZERO,
            history_failure: None,
            opened: Vec::new(),
            heartbeats_sent: 0,
            transport_closes: 0,
            cancelled: Vec::new(),
            renders: 0,
            last_view: None,
        }
    }

    /// The broker.
    pub fn broker(&self) -> &SimBroker {
        &self.broker
    }

    /// Mutable access to the broker.
    pub fn broker_mut(&mut self) -> &mut SimBroker {
        &mut self.broker
    }

    /// Queue a user intent for the next turn.
    pub fn inject_intent(&mut self, intent: Intent) {
        self.pending.push_back(DriverEvent::Intent(intent));
    }

    /// Queue an arbitrary event for the next turn.
    pub fn inject_event(&mut self, event: DriverEvent) {
        self.pending.push_back(event);
    }

    /// Schedule something `after` from now.
    pub fn schedule(&mut self, after: Duration, what: Scheduled) {
        let at = self.env.now() + after;
        self.scheduled.push((at, what));
    }

    /// When unreachable, every transport open fails.
    pub fn set_network_up(&mut self, up: bool) {
        self.network_up = up;
    }

    /// Delay before history answers arrive.
    pub fn set_history_delay(&mut self, delay: Duration) {
        self.history_delay = delay;
    }

    /// Make history requests fail with `failure`.
    pub fn fail_history(&mut self, failure: FetchError) {
        self.history_failure = Some(failure);
    }

    /// Kill the transport now.
    pub fn drop_link(&mut self, reason: &str) {
        if !self.link_open {
            return;
        }
        self.link_open = false;
        self.broker.disconnect();
        self.discard_transport_events();
        self.pending.push_back(DriverEvent::TransportClosed { reason: reason.to_string() });
    }

    /// Another participant posts to `room_id` now.
    pub fn publish_foreign(&mut self, room_id: &RoomId, sender: &str, content: &str) {
        let frames = self.broker.publish_foreign(room_id, sender, content, self.env.wall_clock());
        if self.link_open {
            self.pending.extend(frames.into_iter().map(DriverEvent::Frame));
        }
    }

    /// Deliver a persisted message to the client again now.
    pub fn redeliver(&mut self, room_id: &RoomId, server_id: i64) {
        let frames = self.broker.redeliver(room_id, server_id);
        if self.link_open {
            self.pending.extend(frames.into_iter().map(DriverEvent::Frame));
        }
    }

    /// Send a bare EOL from the server now.
    pub fn server_heartbeat(&mut self) {
        if self.link_open {
            self.pending.push_back(DriverEvent::HeartBeat);
        }
    }

    /// Check if there are pending events to process.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Earliest scheduled occurrence.
    pub fn next_scheduled(&self) -> Option<SimInstant> {
        self.scheduled.iter().map(|(at, _)| *at).min()
    }

    /// Whether a transport is currently open.
    pub fn link_open(&self) -> bool {
        self.link_open
    }

    /// URLs of every transport open requested.
    pub fn opened(&self) -> &[String] {
        &self.opened
    }

    /// Heart-beats sent by the client.
    pub fn heartbeats_sent(&self) -> usize {
        self.heartbeats_sent
    }

    /// Transport releases requested by the client.
    pub fn transport_closes(&self) -> usize {
        self.transport_closes
    }

    /// History requests the client abandoned.
    pub fn cancelled(&self) -> &[u64] {
        &self.cancelled
    }

    /// Number of renders.
    pub fn renders(&self) -> usize {
        self.renders
    }

    /// Most recently rendered view.
    pub fn last_view(&self) -> Option<&ChatView> {
        self.last_view.as_ref()
    }

    fn discard_transport_events(&mut self) {
        self.pending.retain(|event| {
            !matches!(
                event,
                DriverEvent::TransportOpened
                    | DriverEvent::TransportClosed { .. }
                    | DriverEvent::TransportRejected { .. }
                    | DriverEvent::Frame(_)
                    | DriverEvent::HeartBeat
            )
        });
    }

    fn take_scheduled(&mut self, until: SimInstant) -> Option<(SimInstant, Scheduled)> {
        let index = self
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= until)
            .min_by_key(|(_, (at, _))| *at)
            .map(|(i, _)| i)?;
        Some(self.scheduled.remove(index))
    }

    fn fire(&mut self, what: Scheduled) {
        match what {
            Scheduled::Event(event) => self.pending.push_back(event),
            Scheduled::History { request_id, room_id } => {
                let result = match &self.history_failure {
                    Some(failure) => Err(failure.clone()),
                    None => Ok(self.broker.history(&room_id)),
                };
                self.pending.push_back(DriverEvent::HistoryLoaded { request_id, result });
            },
            Scheduled::DropLink { reason } => self.drop_link(&reason),
            Scheduled::Foreign { room_id, sender, content } => {
                self.publish_foreign(&room_id, &sender, &content);
            },
        }
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn open_transport(
        &mut self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(), Self::Error> {
        self.opened.push(url.to_string());

        let event = if !self.network_up {
            DriverEvent::TransportClosed { reason: "connection refused".to_string() }
        } else if !self.broker.accepts_upgrade(headers) {
            DriverEvent::TransportRejected { reason: "HTTP 401".to_string() }
        } else {
            self.link_open = true;
            DriverEvent::TransportOpened
        };
        self.pending.push_back(event);
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        if !self.link_open {
            tracing::trace!(command = %frame.command, "frame lost, link down");
            return Ok(());
        }

        let replies = self.broker.receive(&frame, self.env.wall_clock());
        self.pending.extend(replies.into_iter().map(DriverEvent::Frame));
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<(), Self::Error> {
        if self.link_open {
            self.heartbeats_sent += 1;
        }
        Ok(())
    }

    async fn close_transport(&mut self) {
        self.transport_closes += 1;
        if self.link_open {
            self.link_open = false;
            self.broker.disconnect();
        }
        self.discard_transport_events();
    }

    fn fetch_history(&mut self, request_id: u64, room_id: RoomId) {
        let at = self.env.now() + self.history_delay;
        self.scheduled.push((at, Scheduled::History { request_id, room_id }));
    }

    fn cancel_history(&mut self, request_id: u64) {
        // The answer stays scheduled; a late result must be ignored.
        self.cancelled.push(request_id);
    }

    async fn next_event(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<DriverEvent>, Self::Error> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let deadline = timeout.map(|t| self.env.now() + t);
            let horizon = match (deadline, self.next_scheduled()) {
                (Some(deadline), Some(next)) => deadline.min(next),
                (Some(deadline), None) => deadline,
                (None, Some(next)) => next,
                (None, None) => return Err(SimDriverError("idle: nothing scheduled".to_string())),
            };

            match self.take_scheduled(horizon) {
                Some((at, what)) => {
                    self.env.advance_to(at);
                    self.fire(what);
                },
                None => {
                    self.env.advance_to(horizon);
                    return Ok(None);
                },
            }
        }
    }

    fn render(&mut self, view: &ChatView) -> Result<(), Self::Error> {
        self.renders += 1;
        self.last_view = Some(view.clone());
        Ok(())
    }
}
