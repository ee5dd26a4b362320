//! Core
//!
//! Pure state machines for the Crewer chat delivery subsystem. Nothing in this
//! crate performs I/O: methods take the current time as input and return
//! actions or values for a driver to act on.
//!
//! # Components
//!
//! - [`session::Session`]: STOMP session lifecycle (handshake, subscription,
//!   heart-beats, reconnect, teardown)
//! - [`store::MessageStore`]: ordered message sequence of the open room
//! - [`reconciler::DeliveryReconciler`]: optimistic sends and echo matching
//! - [`env::Environment`]: time and randomness abstraction
//! - [`auth::AuthContext`]: explicit bearer token holder

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod env;
pub mod error;
pub mod message;
pub mod reconciler;
pub mod room;
pub mod session;
pub mod store;

pub use auth::AuthContext;
pub use env::{Environment, Moment};
pub use error::{SendError, SessionError};
pub use message::{ChatMessage, DeliveryState, LocalId, MessageId};
pub use reconciler::{DeliveryReconciler, EchoOutcome, ReconcilerConfig};
pub use room::{ChatRoom, Profile, RoomId};
pub use session::{Session, SessionAction, SessionConfig, SessionState};
pub use store::MessageStore;
