//! Command bridge handle.
//!
//! [`CommandBridge`] is the public face of the bridge. It is a cheap
//! cloneable handle that posts requests to the event loop task and awaits
//! the replies.
//!
//! # Example
//!
//! ```no_run
//! use proxxy_bridge::{CommandBridge, HarStart, NativeHostConfig, NativeHostTransport};
//!
//! # async fn example() -> proxxy_bridge::Result<()> {
//! let transport = NativeHostTransport::new(NativeHostConfig::new("/usr/local/bin/proxxy-host"));
//! let bridge = CommandBridge::new(transport);
//!
//! bridge.on_status_update(|update| println!("{}: {}", update.module, update.status));
//! bridge.connect().await?;
//!
//! let state = bridge.call(HarStart::all()).await?;
//! assert!(state.recording);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::{Action, Module, Ping, StatusUpdate};
use crate::transport::Transport;

use super::event_loop::{BridgeCommand, BridgeStats, EventLoop};
use super::observer::Observers;
use super::state::ConnectionState;
use super::BridgeConfig;

// ============================================================================
// CommandBridge
// ============================================================================

/// Request/response bridge to the native host.
///
/// Clones share one connection, one set of pending commands and one set of
/// subscribers. Dropping the last clone shuts the bridge down as if
/// [`CommandBridge::disconnect`] had been called.
#[derive(Clone)]
pub struct CommandBridge {
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
    observers: Arc<Observers>,
    state_rx: watch::Receiver<ConnectionState>,
    command_timeout: Duration,
}

// ============================================================================
// CommandBridge - Display
// ============================================================================

impl fmt::Debug for CommandBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBridge")
            .field("state", &self.state())
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CommandBridge - Constructors
// ============================================================================

impl CommandBridge {
    /// Creates a disconnected bridge with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(transport: impl Transport) -> Self {
        Self::spawn(Arc::new(transport), &BridgeConfig::default())
    }

    /// Creates a disconnected bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_config(transport: impl Transport, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::spawn(Arc::new(transport), &config))
    }

    fn spawn(transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        let observers = Arc::new(Observers::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let command_tx = EventLoop::spawn(transport, config, Arc::clone(&observers), state_tx);

        Self {
            command_tx,
            observers,
            state_rx,
            command_timeout: config.command_timeout(),
        }
    }
}

// ============================================================================
// CommandBridge - Connection
// ============================================================================

impl CommandBridge {
    /// Opens the channel to the native host.
    ///
    /// Resolves immediately when already connected. Resets the automatic
    /// reconnect budget and cancels any scheduled retry.
    ///
    /// # Errors
    ///
    /// - [`Error::Connect`] if the transport could not be opened; automatic
    ///   retries are scheduled in the background
    /// - [`Error::Destroyed`] after [`Self::disconnect`]
    pub async fn connect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(BridgeCommand::Connect { reply_tx })?;
        reply_rx.await.map_err(|_| Error::Destroyed)?
    }

    /// Shuts the bridge down.
    ///
    /// Pending commands fail with [`Error::Disconnected`], subscribers are
    /// removed without being notified, and every later operation fails with
    /// [`Error::Destroyed`]. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.post(BridgeCommand::Destroy { reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
        self.observers.clear();
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Returns `true` if commands can be sent right now.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that observes every state transition.
    #[inline]
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Connects if needed, then round-trips a `system.ping`.
    ///
    /// Never fails; problems are logged and reported as `false`.
    pub async fn test_connection(&self) -> bool {
        if !self.is_connected()
            && let Err(e) = self.connect().await
        {
            warn!(error = %e, "Connection test could not connect");
            return false;
        }

        match self.call(Ping).await {
            Ok(reply) => {
                debug!(?reply, "Connection test succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, "Connection test ping failed");
                false
            }
        }
    }
}

// ============================================================================
// CommandBridge - Commands
// ============================================================================

impl CommandBridge {
    /// Sends a command with the configured deadline and waits for its data.
    ///
    /// Does not connect implicitly.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the channel is not open
    /// - [`Error::Command`] if the host answered with an error
    /// - [`Error::Protocol`] if the host's answer could not be decoded
    /// - [`Error::CommandTimeout`] if no answer arrived in time
    /// - [`Error::Disconnected`] if the channel closed first
    /// - [`Error::Destroyed`] after [`Self::disconnect`]
    pub async fn send_command(
        &self,
        module: Module,
        action: impl Into<String>,
        payload: Option<Value>,
    ) -> Result<Value> {
        self.send_command_with_timeout(module, action, payload, self.command_timeout)
            .await
    }

    /// Sends a command with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_command`], plus [`Error::Config`] if `timeout`
    /// exceeds [`MAX_COMMAND_TIMEOUT`](super::config::MAX_COMMAND_TIMEOUT).
    pub async fn send_command_with_timeout(
        &self,
        module: Module,
        action: impl Into<String>,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();

        self.post(BridgeCommand::Send {
            module,
            action: action.into(),
            payload,
            timeout,
            response_tx,
        })?;

        response_rx.await.map_err(|_| Error::Destroyed)?
    }

    /// Sends a typed action and decodes its result.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_command`], plus [`Error::Json`] if the data does
    /// not decode as `A::Output`.
    pub async fn call<A: Action>(&self, action: A) -> Result<A::Output> {
        let payload = match serde_json::to_value(&action)? {
            Value::Null => None,
            value => Some(value),
        };

        let data = self.send_command(A::MODULE, A::NAME, payload).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Number of commands awaiting a response. Zero once destroyed.
    pub async fn pending_count(&self) -> usize {
        self.stats().await.map(|stats| stats.pending).unwrap_or(0)
    }

    /// Diagnostic counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] after [`Self::disconnect`].
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(BridgeCommand::Stats { reply_tx })?;
        reply_rx.await.map_err(|_| Error::Destroyed)
    }

    #[inline]
    fn post(&self, command: BridgeCommand) -> Result<()> {
        self.command_tx.send(command).map_err(|_| Error::Destroyed)
    }
}

// ============================================================================
// CommandBridge - Subscriptions
// ============================================================================

impl CommandBridge {
    /// Calls `callback` each time the channel opens.
    pub fn on_connect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.observers.next_id();
        self.observers
            .connect
            .subscribe(id, Arc::new(move |_: &()| callback()));
        id
    }

    /// Calls `callback` each time an open channel is lost.
    ///
    /// Not called for [`Self::disconnect`].
    pub fn on_disconnect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.observers.next_id();
        self.observers
            .disconnect
            .subscribe(id, Arc::new(move |_: &()| callback()));
        id
    }

    /// Calls `callback` for every status update pushed by the host.
    pub fn on_status_update<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StatusUpdate) + Send + Sync + 'static,
    {
        let id = self.observers.next_id();
        self.observers.status.subscribe(id, Arc::new(callback));
        id
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
