//! Typed chat operations over a single multiplexed duplex connection.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod server;
pub mod storage;

pub use error::{ChatError, Result};
pub use network::{ChatClient, ConnectionProvider, ConnectionSlot, MessageSubscription};
