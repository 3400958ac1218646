use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::{ChatError, Result};

use super::payload::WirePayload;

/// A multiplexed duplex connection.
///
/// Implementations must allow any number of interactions to be in flight at
/// once from different tasks; callers share one handle without locking.
pub trait Connection: Send + Sync {
    /// One request, exactly one reply or one error.
    fn request_response(&self, payload: WirePayload) -> BoxFuture<'static, Result<WirePayload>>;

    /// One request, zero or more replies, ended by completion or an error.
    fn request_stream(&self, payload: WirePayload) -> BoxStream<'static, Result<WirePayload>>;

    /// One request, no reply. Resolves once the request has been handed off.
    fn fire_and_forget(&self, payload: WirePayload) -> BoxFuture<'static, Result<()>>;

    fn is_disposed(&self) -> bool;

    fn dispose(&self);
}

/// Source of the connection the chat client talks through.
pub trait ConnectionProvider: Send + Sync {
    /// The current connection, if one exists and has not been disposed.
    ///
    /// The check is not atomic with respect to a concurrent dispose; a handle
    /// returned here may already be dead by the time it is used.
    fn active(&self) -> Result<Arc<dyn Connection>>;
}

/// Holds the one connection shared by the application.
///
/// Populated and replaced by whatever manages the session lifecycle.
#[derive(Default)]
pub struct ConnectionSlot {
    current: RwLock<Option<Arc<dyn Connection>>>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(connection: Arc<dyn Connection>) -> Self {
        let slot = Self::new();
        slot.install(connection);
        slot
    }

    /// Stores `connection` as the active one, returning the previous handle.
    ///
    /// The previous connection is not disposed; that is the caller's call.
    pub fn install(&self, connection: Arc<dyn Connection>) -> Option<Arc<dyn Connection>> {
        let previous = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(connection);
        log::info!(
            "Installed chat connection (replaced existing: {})",
            previous.is_some()
        );
        previous
    }

    pub fn take(&self) -> Option<Arc<dyn Connection>> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Removes and disposes the current connection, if any.
    pub fn dispose(&self) {
        if let Some(connection) = self.take() {
            connection.dispose();
            log::info!("Chat connection disposed");
        }
    }
}

impl ConnectionProvider for ConnectionSlot {
    fn active(&self) -> Result<Arc<dyn Connection>> {
        let current = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match current.as_ref() {
            Some(connection) if !connection.is_disposed() => Ok(Arc::clone(connection)),
            _ => Err(ChatError::ConnectionUnavailable),
        }
    }
}
