//! Client
//!
//! Action-based chat client for Crewer rooms. Ties the session, the message
//! store and the delivery reconciler of one open room together.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and Action-Based patterns as
//! [`crewchat_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`]) for
//! the caller to execute.
//!
//! # Components
//!
//! - [`ChatClient`]: Top-level state machine for the open room
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//!
//! # I/O (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::connect`]: STOMP over WebSocket
//! - [`system_env::SystemEnv`]: Production environment
//!
//! With the `http` feature enabled:
//! - [`http::ApiClient`]: Room listings, history and profile over REST

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "transport")]
pub mod system_env;
#[cfg(feature = "transport")]
pub mod transport;

pub use client::{ChatClient, ClientConfig};
pub use crewchat_core::{
    AuthContext, ChatMessage, ChatRoom, DeliveryState, LocalId, MessageId, Profile, RoomId,
    SessionState, env::Environment,
};
pub use error::{ClientError, FetchError};
pub use event::{ClientAction, ClientEvent};
