//! Terminal driver for the line-oriented client.
//!
//! Implements the [`Driver`] trait with a WebSocket transport task, REST
//! history tasks and a stdin reader, all feeding one event channel. Output is
//! plain lines on stdout written by [`Screen`].

use std::{
    collections::HashMap,
    io::{self, Write},
    time::Duration,
};

use crewchat_app::{ChatView, Driver, DriverEvent, Intent};
use crewchat_client::{
    FetchError, RoomId,
    http::ApiClient,
    transport::{self, TransportError, TransportEvent},
};
use crewchat_proto::Frame;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::AbortHandle,
};

use crate::screen::{Screen, failed_at};

/// Buffered frames from the runtime to the transport task.
const LINK_CAPACITY: usize = 64;

/// Terminal driver errors.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// I/O error from terminal operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every event source is gone.
    #[error("event channel closed")]
    ChannelClosed,
}

/// Inputs from the background tasks.
enum Inbound {
    /// Event of the transport opened as `generation`.
    Link { generation: u64, event: DriverEvent },
    /// Event not tied to a transport.
    Event(DriverEvent),
    /// A line typed by the user.
    Line(String),
}

enum LinkCommand {
    Frame(Frame),
    HeartBeat,
    Close,
}

struct Link {
    generation: u64,
    commands: mpsc::Sender<LinkCommand>,
}

/// Terminal driver implementing the [`Driver`] trait.
///
/// Owns the REST client and spawns one task per transport and per history
/// request. Events of a transport that was closed are dropped on receipt.
pub struct TerminalDriver {
    api: ApiClient,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    link: Option<Link>,
    generation: u64,
    history: HashMap<u64, AbortHandle>,
    screen: Screen,
    view: ChatView,
}

impl TerminalDriver {
    /// Create the driver, start reading stdin and load the user's profile.
    /// Ctrl-C behaves like `/quit`.
    pub fn new(api: ApiClient) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_lines(inbound_tx.clone()));
        tokio::spawn(load_profile(api.clone(), inbound_tx.clone()));
        tokio::spawn(quit_on_interrupt(inbound_tx.clone()));

        Self {
            api,
            inbound_tx,
            inbound_rx,
            link: None,
            generation: 0,
            history: HashMap::new(),
            screen: Screen::new(),
            view: ChatView::new(),
        }
    }

    /// Turn a typed line into an intent. A `/retry` that names no failed
    /// message is answered here.
    fn parse_line(&self, line: &str) -> Result<Option<Intent>, TerminalError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line == "/quit" {
            return Ok(Some(Intent::Close));
        }

        if let Some(arg) = retry_argument(line) {
            let local_id = arg.trim().parse().ok().and_then(|n| failed_at(&self.view, n));
            return match local_id {
                Some(local_id) => Ok(Some(Intent::Retry(local_id))),
                None => {
                    writeln!(io::stdout().lock(), "** /retry needs the number of a failed message")?;
                    Ok(None)
                },
            };
        }

        Ok(Some(Intent::Send(line.to_string())))
    }
}

impl Driver for TerminalDriver {
    type Error = TerminalError;

    async fn open_transport(
        &mut self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(), Self::Error> {
        self.generation += 1;
        let generation = self.generation;
        let (commands, commands_rx) = mpsc::channel(LINK_CAPACITY);

        if let Some(old) = self.link.replace(Link { generation, commands }) {
            // A new open supersedes a transport the runtime did not close.
            let _ = old.commands.try_send(LinkCommand::Close);
        }

        tokio::spawn(run_link(
            url.to_string(),
            headers.to_vec(),
            generation,
            commands_rx,
            self.inbound_tx.clone(),
        ));
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        if let Some(link) = &self.link
            && link.commands.send(LinkCommand::Frame(frame)).await.is_err()
        {
            tracing::trace!("frame dropped, transport task gone");
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<(), Self::Error> {
        if let Some(link) = &self.link
            && link.commands.send(LinkCommand::HeartBeat).await.is_err()
        {
            tracing::trace!("heart-beat dropped, transport task gone");
        }
        Ok(())
    }

    async fn close_transport(&mut self) {
        if let Some(link) = self.link.take()
            && link.commands.send(LinkCommand::Close).await.is_err()
        {
            tracing::trace!("transport task already gone");
        }
    }

    fn fetch_history(&mut self, request_id: u64, room_id: RoomId) {
        let api = self.api.clone();
        let inbound = self.inbound_tx.clone();

        let task = tokio::spawn(async move {
            let result = api.history(&room_id).await.map_err(FetchError::from);
            let _ = inbound.send(Inbound::Event(DriverEvent::HistoryLoaded { request_id, result }));
        });
        self.history.insert(request_id, task.abort_handle());
    }

    fn cancel_history(&mut self, request_id: u64) {
        if let Some(task) = self.history.remove(&request_id) {
            task.abort();
        }
    }

    async fn next_event(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<DriverEvent>, Self::Error> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let inbound = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.inbound_rx.recv()).await
                {
                    Ok(inbound) => inbound,
                    Err(_) => return Ok(None),
                },
                None => self.inbound_rx.recv().await,
            };

            match inbound.ok_or(TerminalError::ChannelClosed)? {
                Inbound::Link { generation, event } => {
                    if self.link.as_ref().is_some_and(|link| link.generation == generation) {
                        return Ok(Some(event));
                    }
                    tracing::trace!(generation, "event from closed transport dropped");
                },
                Inbound::Event(event) => {
                    if let DriverEvent::HistoryLoaded { request_id, .. } = &event {
                        self.history.remove(request_id);
                    }
                    return Ok(Some(event));
                },
                Inbound::Line(line) => {
                    if let Some(intent) = self.parse_line(&line)? {
                        return Ok(Some(DriverEvent::Intent(intent)));
                    }
                },
            }
        }
    }

    fn render(&mut self, view: &ChatView) -> Result<(), Self::Error> {
        self.view.clone_from(view);
        self.screen.render(view, &mut io::stdout().lock())?;
        Ok(())
    }
}

/// Argument of a `/retry` command, `None` for any other line.
fn retry_argument(line: &str) -> Option<&str> {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    (command == "/retry").then_some(arg)
}

/// Own one WebSocket until it closes or the runtime lets go of it.
async fn run_link(
    url: String,
    headers: Vec<(String, String)>,
    generation: u64,
    mut commands: mpsc::Receiver<LinkCommand>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let emit = |event| {
        let _ = inbound.send(Inbound::Link { generation, event });
    };

    let mut transport = match transport::connect(&url, &headers).await {
        Ok(transport) => transport,
        Err(TransportError::Unauthorized) => {
            emit(DriverEvent::TransportRejected { reason: "unauthorized".to_string() });
            return;
        },
        Err(err) => {
            tracing::warn!(error = %err, "transport open failed");
            emit(DriverEvent::TransportClosed { reason: err.to_string() });
            return;
        },
    };

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Frame(frame)) => {
                    if transport.send(frame).await.is_err() {
                        tracing::debug!("send on closed transport");
                    }
                },
                Some(LinkCommand::HeartBeat) => {
                    if transport.send_heartbeat().await.is_err() {
                        tracing::debug!("heart-beat on closed transport");
                    }
                },
                Some(LinkCommand::Close) | None => {
                    transport.disconnect().await;
                    return;
                },
            },
            event = transport.next_event() => match event {
                Some(TransportEvent::Connected) => emit(DriverEvent::TransportOpened),
                Some(TransportEvent::FrameReceived(frame)) => emit(DriverEvent::Frame(frame)),
                Some(TransportEvent::HeartBeat) => emit(DriverEvent::HeartBeat),
                Some(TransportEvent::Error(err)) => tracing::debug!(error = %err, "undecodable message"),
                Some(TransportEvent::Disconnected { reason }) => {
                    emit(DriverEvent::TransportClosed { reason });
                    return;
                },
                None => {
                    emit(DriverEvent::TransportClosed { reason: "transport closed".to_string() });
                    return;
                },
            },
        }
    }
}

/// Forward stdin lines. End of input leaves the room.
async fn read_lines(inbound: mpsc::UnboundedSender<Inbound>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if inbound.send(Inbound::Line(line)).is_err() {
                    return;
                }
            },
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "stdin read failed");
                break;
            },
        }
    }

    let _ = inbound.send(Inbound::Line("/quit".to_string()));
}

async fn load_profile(api: ApiClient, inbound: mpsc::UnboundedSender<Inbound>) {
    match api.profile().await {
        Ok(profile) => {
            tracing::debug!(nickname = %profile.nickname, "profile loaded");
            let _ = inbound.send(Inbound::Event(DriverEvent::ProfileLoaded(profile)));
        },
        Err(err) => {
            let event = DriverEvent::ProfileFailed(FetchError::from(err));
            let _ = inbound.send(Inbound::Event(event));
        },
    }
}

async fn quit_on_interrupt(inbound: mpsc::UnboundedSender<Inbound>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = inbound.send(Inbound::Line("/quit".to_string()));
    }
}
