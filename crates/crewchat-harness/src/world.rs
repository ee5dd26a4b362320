//! Scenario world: runtime, simulation driver and broker wired together.
//!
//! Tests script user intents and network events against a [`SimWorld`], move
//! virtual time with [`SimWorld::run_for`], and end with oracle checks on the
//! view, the client and the broker.

use std::time::Duration;

use crewchat_app::{ChatView, Intent, Runtime, RuntimeError};
use crewchat_client::{
    AuthContext, ChatClient, ChatMessage, ClientConfig, FetchError, RoomId, SessionState,
};
use crewchat_core::{Environment, Profile};

use crate::{SimBroker, SimDriver, SimDriverError, SimEnv, sim_broker::SELF_NICKNAME};

/// Token the default world signs in with.
pub const TOKEN: &str = "jwt";

/// Runtime type used by the harness.
pub type SimRuntime = Runtime<SimDriver, SimEnv>;

/// Errors surfaced by scenario steps.
pub type SimError = RuntimeError<SimDriverError>;

/// A simulated client connected to a simulated broker.
pub struct SimWorld {
    env: SimEnv,
    runtime: SimRuntime,
}

impl SimWorld {
    /// World with default configuration and seed 0.
    pub fn new() -> Self {
        Self::with_config(0, ClientConfig::default())
    }

    /// World with a given seed and client configuration.
    pub fn with_config(seed: u64, config: ClientConfig) -> Self {
        Self::build(seed, config, AuthContext::new(TOKEN))
    }

    /// World whose client holds `auth` instead of the accepted token.
    pub fn with_auth(auth: AuthContext) -> Self {
        Self::build(0, ClientConfig::default(), auth)
    }

    fn build(seed: u64, config: ClientConfig, auth: AuthContext) -> Self {
        let env = SimEnv::with_seed(seed);
        let driver = SimDriver::new(env.clone(), SimBroker::new(TOKEN));
        let runtime = Runtime::new(driver, env.clone(), config, auth);
        Self { env, runtime }
    }

    /// Environment (shared virtual clock).
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The runtime.
    pub fn runtime(&mut self) -> &mut SimRuntime {
        &mut self.runtime
    }

    /// The driver.
    pub fn driver(&self) -> &SimDriver {
        self.runtime.driver()
    }

    /// Mutable access to the driver.
    pub fn driver_mut(&mut self) -> &mut SimDriver {
        self.runtime.driver_mut()
    }

    /// The broker.
    pub fn broker(&self) -> &SimBroker {
        self.runtime.driver().broker()
    }

    /// Mutable access to the broker.
    pub fn broker_mut(&mut self) -> &mut SimBroker {
        self.runtime.driver_mut().broker_mut()
    }

    /// The client state machine.
    pub fn client(&self) -> &ChatClient<SimEnv> {
        self.runtime.client()
    }

    /// The view model.
    pub fn view(&self) -> &ChatView {
        self.runtime.view()
    }

    /// Connection state.
    pub fn state(&self) -> SessionState {
        self.runtime.client().state()
    }

    /// Messages of the open room.
    pub fn messages(&self) -> &[ChatMessage] {
        self.runtime.client().messages()
    }

    /// Message contents in display order.
    pub fn contents(&self) -> Vec<&str> {
        self.messages().iter().map(|m| m.content.as_str()).collect()
    }

    /// Tell the client who the signed-in user is.
    pub async fn sign_in_as_self(&mut self) -> Result<(), SimError> {
        self.runtime
            .driver_mut()
            .inject_event(crewchat_app::DriverEvent::ProfileLoaded(Profile::new(SELF_NICKNAME)));
        self.settle().await
    }

    /// Report that the profile request failed.
    pub async fn profile_unavailable(&mut self, err: FetchError) -> Result<(), SimError> {
        self.runtime.driver_mut().inject_event(crewchat_app::DriverEvent::ProfileFailed(err));
        self.settle().await
    }

    /// Open a room, wait for the subscription, then process whatever is due
    /// at that instant (an undelayed history answer).
    pub async fn open(&mut self, room_id: &str) -> Result<(), SimError> {
        self.runtime.open(RoomId::new(room_id)).await?;
        self.run_for(Duration::ZERO).await
    }

    /// Close the room.
    pub async fn close(&mut self) -> Result<(), SimError> {
        self.runtime.close().await
    }

    /// Submit text and process everything that follows immediately.
    pub async fn send(&mut self, text: &str) -> Result<(), SimError> {
        self.intent(Intent::Send(text.to_string())).await
    }

    /// Inject an intent and settle.
    pub async fn intent(&mut self, intent: Intent) -> Result<(), SimError> {
        self.runtime.driver_mut().inject_intent(intent);
        self.settle().await
    }

    /// Process every event that is already queued, without moving time.
    pub async fn settle(&mut self) -> Result<(), SimError> {
        while self.runtime.driver().has_pending() {
            self.runtime.turn().await?;
        }
        Ok(())
    }

    /// Run the loop for `span` of virtual time.
    ///
    /// Every deadline and scheduled occurrence inside the span is processed in
    /// order; the clock ends exactly `span` later.
    pub async fn run_for(&mut self, span: Duration) -> Result<(), SimError> {
        let target = self.env.now() + span;

        loop {
            self.settle().await?;

            let next_timer = self.runtime.client().next_deadline();
            let next_scheduled = self.runtime.driver().next_scheduled();
            let wake = [next_timer, next_scheduled].into_iter().flatten().min();

            match wake {
                Some(at) if at <= target => self.runtime.turn().await?,
                _ => break,
            }
        }

        self.env.advance_to(target);
        Ok(())
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}
