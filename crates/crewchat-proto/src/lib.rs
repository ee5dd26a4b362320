//! Wire protocol for the Crewer chat broker.
//!
//! The backend relays STOMP 1.2 over a WebSocket. Every WebSocket text message
//! carries exactly one STOMP frame, or a bare end-of-line heart-beat. Frame
//! bodies on the chat destinations are JSON documents.
//!
//! # Components
//!
//! - [`Frame`]: a decoded STOMP frame (command, ordered headers, raw body)
//! - [`Packet`]: result of decoding one transport message (frame or heart-beat)
//! - [`HeartBeat`]: the `heart-beat` header negotiation values
//! - [`destination`]: topic and application destinations for a room
//! - [`payloads`]: JSON documents exchanged with the broker and REST API

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod destination;
pub mod errors;
mod frame;
pub mod payloads;

pub use errors::ProtocolError;
pub use frame::{Command, Frame, HeartBeat, Negotiated, Packet};
