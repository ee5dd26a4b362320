//! Application layer for the chat room view
//!
//! View model and generic runtime that drive one open room, enabling
//! deterministic simulation testing with the same code that runs in
//! production.
//!
//! # Components
//!
//! - [`ChatView`]: View model (messages, connection banner, send control)
//! - [`Driver`]: Trait for platform-specific I/O abstraction
//! - [`Runtime`]: Generic orchestration loop using Driver

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod runtime;
mod view;

pub use driver::{Driver, DriverEvent, Intent};
pub use runtime::{Runtime, RuntimeError};
pub use view::ChatView;
