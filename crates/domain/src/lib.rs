//! Shared types for the Thoughtline agent runtime.
//!
//! Everything here is plain data: errors, configuration, the chat message
//! model, provider stream events and the published agent thoughts. No I/O.

pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod thought;
pub mod tool;

pub use error::{Error, Result};
