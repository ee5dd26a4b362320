//! Deterministic simulation harness for the chat client.
//!
//! Virtual-clock [`SimEnv`], an in-process STOMP [`SimBroker`] and a
//! [`SimDriver`] that plugs both into the same [`crewchat_app::Runtime`] the
//! terminal client uses. Timing scenarios (reconnect delays, send timeouts,
//! heart-beats) run instantly and reproducibly.
//!
//! [`SimWorld`] wires the pieces together for scenario tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_broker;
pub mod sim_driver;
pub mod sim_env;
pub mod world;

pub use sim_broker::SimBroker;
pub use sim_driver::{Scheduled, SimDriver, SimDriverError};
pub use sim_env::{SimEnv, SimInstant};
pub use world::{SimError, SimRuntime, SimWorld, TOKEN};
