//! Generic runtime for a chat room view.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`ChatClient`]: protocol state machine
//! - [`ChatView`]: view model
//! - [`Driver`]: platform-specific I/O
//!
//! It is single-threaded: the client and view are only touched from the
//! loop, and timers are the client's deadlines turned into driver timeouts.

use crewchat_client::{
    AuthContext, ChatClient, ClientAction, ClientConfig, ClientError, ClientEvent, Environment,
    RoomId,
};
use crewchat_core::SessionError;
use thiserror::Error;

use crate::{ChatView, Driver, DriverEvent, Intent};

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError<E: std::error::Error + 'static> {
    /// The driver failed
    #[error("driver error: {0}")]
    Driver(#[source] E),

    /// The client rejected the request
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The room could not be opened
    #[error("could not open room: {0}")]
    Open(SessionError),

    /// The room was closed before the open completed
    #[error("room closed while opening")]
    Cancelled,
}

impl<E: std::error::Error + 'static> RuntimeError<E> {
    /// Whether the failure requires a new token.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Client(err) => err.is_auth(),
            Self::Open(err) => err.is_auth(),
            Self::Driver(_) | Self::Cancelled => false,
        }
    }
}

/// Outcome of an open in progress, seen while executing actions.
enum Opening {
    Done,
    Failed(SessionError),
}

/// Generic runtime that orchestrates client, view and driver.
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `E`: Environment providing time and randomness
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    env: E,
    client: ChatClient<E>,
    view: ChatView,
}

impl<D, E> Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    /// Create a runtime with no room open.
    pub fn new(driver: D, env: E, config: ClientConfig, auth: AuthContext) -> Self {
        let client = ChatClient::new(env.clone(), config, auth);
        Self { driver, env, client, view: ChatView::new() }
    }

    /// Open a room and wait for the subscription.
    ///
    /// Resolves once the handshake completed and the room topic is subscribed.
    /// History keeps loading in the background.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Client` if a room is already open or there is no token
    /// - `RuntimeError::Open` with the auth or connect failure
    /// - `RuntimeError::Cancelled` if the user closed the room meanwhile
    /// - `RuntimeError::Driver` on driver failure
    pub async fn open(&mut self, room_id: RoomId) -> Result<(), RuntimeError<D::Error>> {
        let actions = match self.client.handle(ClientEvent::OpenRoom(room_id.clone())) {
            Ok(actions) => actions,
            Err(err) => {
                self.view.auth_required |= err.is_auth();
                self.view.set_notice(err.to_string());
                self.render()?;
                return Err(err.into());
            },
        };

        tracing::info!(room = %room_id, "opening room");
        self.view.open(room_id);

        let mut outcome = self.execute(actions).await?;
        loop {
            match outcome {
                Some(Opening::Done) => return Ok(()),
                Some(Opening::Failed(err)) => {
                    tracing::warn!(error = %err, "open failed");
                    return Err(RuntimeError::Open(err));
                },
                None if self.client.room_id().is_none() => return Err(RuntimeError::Cancelled),
                None => outcome = self.step().await?,
            }
        }
    }

    /// Run the event loop until the room is closed.
    ///
    /// A session that ends on its own (reconnect limit, token rejected) keeps
    /// its messages on screen; the loop still waits for the user to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub async fn run(&mut self) -> Result<(), RuntimeError<D::Error>> {
        while self.client.room_id().is_some() {
            self.step().await?;
        }
        Ok(())
    }

    /// Close the room: unsubscribe, release the transport and disarm every
    /// timer. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub async fn close(&mut self) -> Result<(), RuntimeError<D::Error>> {
        let actions = self.client.handle(ClientEvent::CloseRoom)?;
        let was_open = self.view.room_id.take().is_some();
        self.execute(actions).await?;

        if was_open {
            tracing::info!("room closed");
            self.render()?;
        }
        Ok(())
    }

    /// Wait for one event (or the next deadline) and process it.
    async fn step(&mut self) -> Result<Option<Opening>, RuntimeError<D::Error>> {
        let timeout = self.client.next_deadline().map(|deadline| {
            let now = self.env.now();
            if deadline > now { deadline - now } else { std::time::Duration::ZERO }
        });

        let event = self.driver.next_event(timeout).await.map_err(RuntimeError::Driver)?;

        let client_event = match event {
            None => ClientEvent::Tick { now: self.env.now() },
            Some(DriverEvent::TransportOpened) => ClientEvent::TransportOpened,
            Some(DriverEvent::TransportClosed { reason }) => {
                tracing::debug!(%reason, "transport closed");
                ClientEvent::TransportClosed { reason }
            },
            Some(DriverEvent::TransportRejected { reason }) => {
                ClientEvent::TransportRejected { reason }
            },
            Some(DriverEvent::Frame(frame)) => ClientEvent::FrameReceived(frame),
            Some(DriverEvent::HeartBeat) => ClientEvent::HeartBeatReceived,
            Some(DriverEvent::HistoryLoaded { request_id, result }) => {
                ClientEvent::HistoryLoaded { request_id, result }
            },
            Some(DriverEvent::ProfileLoaded(profile)) => ClientEvent::ProfileLoaded(profile),
            Some(DriverEvent::ProfileFailed(err)) => {
                tracing::warn!(error = %err, "profile unavailable");
                self.view.profile_failed(&err);
                self.render()?;
                return Ok(None);
            },
            Some(DriverEvent::Intent(Intent::Close)) => {
                self.close().await?;
                return Ok(None);
            },
            Some(DriverEvent::Intent(Intent::Send(text))) => ClientEvent::Send(text),
            Some(DriverEvent::Intent(Intent::Retry(local_id))) => ClientEvent::Retry(local_id),
        };

        match self.client.handle(client_event) {
            Ok(actions) => self.execute(actions).await,
            Err(err) => {
                // Rejected intents and stray frames leave the session as it was.
                tracing::debug!(error = %err, "event rejected");
                self.view.set_notice(err.to_string());
                self.render()?;
                Ok(None)
            },
        }
    }

    /// Execute client actions, then render once if the view changed.
    async fn execute(
        &mut self,
        actions: Vec<ClientAction>,
    ) -> Result<Option<Opening>, RuntimeError<D::Error>> {
        let mut changed = false;
        let mut outcome = None;

        for action in actions {
            changed |= self.view.apply(&action);

            match action {
                ClientAction::OpenTransport { url, headers } => {
                    tracing::debug!(%url, "opening transport");
                    self.driver.open_transport(&url, &headers).await.map_err(RuntimeError::Driver)?;
                },
                ClientAction::SendFrame(frame) => {
                    tracing::trace!(command = %frame.command, "sending frame");
                    self.driver.send_frame(frame).await.map_err(RuntimeError::Driver)?;
                },
                ClientAction::SendHeartBeat => {
                    self.driver.send_heartbeat().await.map_err(RuntimeError::Driver)?;
                },
                ClientAction::CloseTransport => self.driver.close_transport().await,
                ClientAction::FetchHistory { request_id, room_id } => {
                    self.driver.fetch_history(request_id, room_id);
                },
                ClientAction::CancelHistory { request_id } => {
                    self.driver.cancel_history(request_id);
                },
                ClientAction::StateChanged(state) => tracing::info!(?state, "connection state"),
                ClientAction::RoomOpened { room_id, resumed } => {
                    tracing::info!(room = %room_id, resumed, "room subscribed");
                    outcome = Some(Opening::Done);
                },
                ClientAction::OpenFailed(err) => outcome = Some(Opening::Failed(err)),
                ClientAction::SessionEnded(err) => tracing::warn!(error = %err, "session ended"),
                ClientAction::MessagesChanged => {
                    self.view.set_messages(self.client.messages());
                    changed = true;
                },
                ClientAction::DeliveryFailed(local_id) => {
                    tracing::warn!(%local_id, "message not confirmed in time");
                },
                ClientAction::HistoryFailed(err) => tracing::warn!(error = %err, "history failed"),
                ClientAction::Log { message } => tracing::debug!("{message}"),
            }
        }

        if changed {
            self.render()?;
        }
        Ok(outcome)
    }

    fn render(&mut self) -> Result<(), RuntimeError<D::Error>> {
        self.driver.render(&self.view).map_err(RuntimeError::Driver)
    }

    /// The view model.
    pub fn view(&self) -> &ChatView {
        &self.view
    }

    /// The client state machine.
    pub fn client(&self) -> &ChatClient<E> {
        &self.client
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the driver, for scripting input in tests.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Process a single event. Exposed for step-wise simulation.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub async fn turn(&mut self) -> Result<(), RuntimeError<D::Error>> {
        self.step().await.map(|_| ())
    }
}
