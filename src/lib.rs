//! WhatsApp session relay
//!
//! Runs one WhatsApp Web session per user, reports pairing codes and
//! connection status to a backend service, and answers inbound chat messages
//! with the backend's replies.

pub mod address;
pub mod api;
pub mod backend;
pub mod config;
pub mod connector;
pub mod error;
pub mod logging;
pub mod relay;
pub mod session;

pub use error::{RelayError, Result};

#[cfg(test)]
mod tests;
