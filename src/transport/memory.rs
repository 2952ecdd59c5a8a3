//! In-process transport.
//!
//! [`MemoryTransport`] stands in for the native host in tests, benchmarks
//! and UI-layer code that wants a scripted helper. Its paired
//! [`MemoryHost`] controls availability and accepts each opened channel as
//! a [`HostEnd`].
//!
//! # Example
//!
//! ```ignore
//! let (transport, mut host) = MemoryTransport::pair();
//! let bridge = CommandBridge::new(transport);
//! bridge.connect().await?;
//!
//! let mut end = host.accept().await.expect("link");
//! let command = end.recv_command().await.expect("command");
//! end.reply_ok(command.id, json!({ "recording": true }))?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::protocol::{Command, Response, StatusUpdate};

use super::{Link, Transport};

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug)]
struct Shared {
    available: AtomicBool,
    open_attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<HostEnd>,
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// [`Transport`] backed by in-process channels.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Creates a transport and its controlling host. The host starts available.
    #[must_use]
    pub fn pair() -> (Self, MemoryHost) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            available: AtomicBool::new(true),
            open_attempts: AtomicUsize::new(0),
            accepted: accepted_tx,
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryHost {
                shared,
                accepted: accepted_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Link> {
        let attempt = self.shared.open_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.shared.available.load(Ordering::SeqCst) {
            debug!(attempt, "Memory host unavailable");
            return Err(Error::connect("memory host unavailable"));
        }

        let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();
        let (to_bridge_tx, to_bridge_rx) = mpsc::unbounded_channel();

        self.shared
            .accepted
            .send(HostEnd {
                incoming: to_host_rx,
                outgoing: to_bridge_tx,
            })
            .map_err(|_| Error::connect("memory host dropped"))?;

        debug!(attempt, "Memory link opened");
        Ok(Link::new(to_host_tx, to_bridge_rx))
    }
}

// ============================================================================
// MemoryHost
// ============================================================================

/// Controller for a [`MemoryTransport`].
///
/// Dropping the host makes every later `open()` fail.
#[derive(Debug)]
pub struct MemoryHost {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<HostEnd>,
}

impl MemoryHost {
    /// Makes `open()` succeed (`true`) or fail with a connect error (`false`).
    #[inline]
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of `open()` calls so far, failed ones included.
    #[inline]
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.shared.open_attempts.load(Ordering::SeqCst)
    }

    /// Waits for the next opened channel.
    pub async fn accept(&mut self) -> Option<HostEnd> {
        self.accepted.recv().await
    }

    /// Returns an already opened channel without waiting.
    #[must_use]
    pub fn try_accept(&mut self) -> Option<HostEnd> {
        self.accepted.try_recv().ok()
    }
}

// ============================================================================
// HostEnd
// ============================================================================

/// The native-host side of one in-memory channel.
///
/// Dropping it closes the channel, which the bridge sees as a disconnect.
#[derive(Debug)]
pub struct HostEnd {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Value>,
}

impl HostEnd {
    /// Receives the next raw message from the bridge.
    ///
    /// Returns `None` once the bridge closed the channel.
    pub async fn recv(&mut self) -> Option<Value> {
        self.incoming.recv().await
    }

    /// Receives the next message and decodes it as a command.
    ///
    /// Messages that are not commands are logged and skipped.
    pub async fn recv_command(&mut self) -> Option<Command> {
        while let Some(message) = self.incoming.recv().await {
            match serde_json::from_value(message) {
                Ok(command) => return Some(command),
                Err(e) => warn!(error = %e, "Memory host received a non-command message"),
            }
        }
        None
    }

    /// Sends a raw message to the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the bridge closed the channel.
    pub fn send(&self, message: Value) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| Error::NotConnected)
    }

    /// Sends a success response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the bridge closed the channel.
    pub fn reply_ok(&self, id: CommandId, data: Value) -> Result<()> {
        self.send(serde_json::to_value(Response::ok(id, data))?)
    }

    /// Sends an error response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the bridge closed the channel.
    pub fn reply_err(&self, id: CommandId, message: impl Into<String>) -> Result<()> {
        self.send(serde_json::to_value(Response::err(id, message))?)
    }

    /// Pushes a status update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the bridge closed the channel.
    pub fn push_status(&self, update: &StatusUpdate) -> Result<()> {
        self.send(serde_json::to_value(update)?)
    }

    /// Closes the channel from the host side.
    #[inline]
    pub fn close(self) {
        drop(self);
    }
}

// ============================================================================
// Tests
// ============================================================================
