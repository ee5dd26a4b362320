//! Terminal client for Crewer chat rooms.
//!
//! A thin shell over [`crewchat_app::Driver`] that provides line-oriented
//! terminal I/O. All orchestration logic lives in the generic
//! [`crewchat_app::Runtime`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod screen;
pub mod terminal;

pub use config::Endpoints;
pub use crewchat_app::{ChatView, Driver, Runtime, RuntimeError};
pub use screen::Screen;
pub use terminal::{TerminalDriver, TerminalError};
