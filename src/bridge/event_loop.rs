//! Bridge event loop.
//!
//! One tokio task owns the correlation table, the connection state machine,
//! the open link and the reconnect timer. It handles, one at a time:
//!
//! - Commands from [`CommandBridge`](super::CommandBridge) handles
//! - Inbound messages and closure of the link
//! - Results of `Transport::open` (run in a spawned task)
//! - Command deadlines
//! - The reconnect timer
//!
//! Nothing here is shared, so nothing here is locked. Observer registries are
//! the only state the handles touch directly.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Sleep, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::protocol::{Command, Incoming, Module};
use crate::transport::{Link, Transport};

use super::correlation::{CorrelationTable, Responder};
use super::observer::Observers;
use super::state::{Backoff, ConnectTrigger, ConnectionState, ConnectionStateMachine};
use super::BridgeConfig;

// ============================================================================
// BridgeCommand
// ============================================================================

/// Requests from bridge handles to the event loop.
pub(crate) enum BridgeCommand {
    /// Open the channel if it is not open.
    Connect {
        reply_tx: oneshot::Sender<Result<()>>,
    },
    /// Send a command and complete `response_tx` with its outcome.
    Send {
        module: Module,
        action: String,
        payload: Option<Value>,
        timeout: Duration,
        response_tx: Responder,
    },
    /// Report diagnostics.
    Stats {
        reply_tx: oneshot::Sender<BridgeStats>,
    },
    /// Shut down for good.
    Destroy { reply_tx: oneshot::Sender<()> },
}

// ============================================================================
// BridgeStats
// ============================================================================

/// Diagnostic counters for one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Commands awaiting a response.
    pub pending: usize,
    /// Responses whose id matched no pending command.
    pub unmatched_responses: u64,
    /// Inbound messages that were neither a response nor a status update.
    pub malformed_messages: u64,
    /// Automatic reconnects scheduled since the last successful open.
    pub reconnect_attempts: u32,
}

// ============================================================================
// EventLoop
// ============================================================================

/// Result of one `Transport::open` call.
struct OpenOutcome {
    /// Attempt the result belongs to.
    epoch: u64,
    result: Result<Link>,
}

/// State owned by the event loop task.
pub(crate) struct EventLoop {
    transport: Arc<dyn Transport>,
    machine: ConnectionStateMachine,
    table: CorrelationTable,
    link: Option<Link>,
    observers: Arc<Observers>,
    state_tx: watch::Sender<ConnectionState>,
    open_tx: mpsc::UnboundedSender<OpenOutcome>,
    open_rx: mpsc::UnboundedReceiver<OpenOutcome>,
    /// Bumped per open attempt; stale outcomes are discarded.
    epoch: u64,
    /// An open attempt is in flight.
    opening: bool,
    /// `connect()` callers waiting for the in-flight attempt.
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    /// Armed reconnect timer.
    retry: Option<Pin<Box<Sleep>>>,
    unmatched_responses: u64,
    malformed_messages: u64,
}

impl EventLoop {
    /// Spawns the event loop and returns its command channel.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        config: &BridgeConfig,
        observers: Arc<Observers>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> mpsc::UnboundedSender<BridgeCommand> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = mpsc::unbounded_channel();

        let event_loop = Self {
            transport,
            machine: ConnectionStateMachine::new(Backoff::from_config(config)),
            table: CorrelationTable::new(),
            link: None,
            observers,
            state_tx,
            open_tx,
            open_rx,
            epoch: 0,
            opening: false,
            connect_waiters: Vec::new(),
            retry: None,
            unmatched_responses: 0,
            malformed_messages: 0,
        };

        tokio::spawn(event_loop.run(command_rx));
        command_tx
    }

    /// Processes events until destroyed or every handle is dropped.
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>) {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(BridgeCommand::Destroy { reply_tx }) => {
                        self.destroy();
                        let _ = reply_tx.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All bridge handles dropped");
                        self.destroy();
                        break;
                    }
                },

                message = Self::next_inbound(&mut self.link) => match message {
                    Some(message) => self.dispatch(message),
                    None => self.handle_transport_closed(),
                },

                Some(outcome) = self.open_rx.recv() => self.handle_open_outcome(outcome),

                Some(id) = self.table.next_expired() => {
                    trace!(%id, "Command deadline handled");
                }

                () = Self::retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    self.start_open(ConnectTrigger::Automatic);
                }
            }
        }

        debug!("Bridge event loop terminated");
    }

    /// Next inbound message, or `None` on closure. Never completes without a link.
    async fn next_inbound(link: &mut Option<Link>) -> Option<Value> {
        match link {
            Some(link) => link.recv().await,
            None => pending().await,
        }
    }

    /// Completes when the reconnect timer fires. Never completes when unarmed.
    async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
        match retry {
            Some(timer) => timer.as_mut().await,
            None => pending().await,
        }
    }

    // ========================================================================
    // Handle Commands
    // ========================================================================

    fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Connect { reply_tx } => self.handle_connect(reply_tx),

            BridgeCommand::Send {
                module,
                action,
                payload,
                timeout,
                response_tx,
            } => self.handle_send(module, action, payload, timeout, response_tx),

            BridgeCommand::Stats { reply_tx } => {
                let _ = reply_tx.send(self.stats());
            }

            // Handled in `run`.
            BridgeCommand::Destroy { reply_tx } => {
                let _ = reply_tx.send(());
            }
        }
    }

    fn handle_connect(&mut self, reply_tx: oneshot::Sender<Result<()>>) {
        match self.machine.state() {
            ConnectionState::Destroyed => {
                let _ = reply_tx.send(Err(Error::Destroyed));
            }

            ConnectionState::Connected => {
                let _ = reply_tx.send(Ok(()));
            }

            _ => {
                self.connect_waiters.push(reply_tx);

                if self.opening {
                    // Join the in-flight attempt, but as a manual one.
                    if self.machine.begin_connect(ConnectTrigger::Manual).is_ok() {
                        self.publish_state();
                    }
                } else {
                    self.start_open(ConnectTrigger::Manual);
                }
            }
        }
    }

    fn handle_send(
        &mut self,
        module: Module,
        action: String,
        payload: Option<Value>,
        timeout: Duration,
        response_tx: Responder,
    ) {
        if !self.machine.state().is_connected() {
            let _ = response_tx.send(Err(Error::NotConnected));
            return;
        }

        // The host may have gone away before its closure was processed.
        let Some(link) = self.link.as_ref().filter(|link| !link.is_closed()) else {
            let _ = response_tx.send(Err(Error::NotConnected));
            return;
        };

        let mut id = CommandId::generate();
        while self.table.contains(&id) {
            id = CommandId::generate();
        }

        let command = Command::with_id(id, module, action, payload);
        let message = match serde_json::to_value(&command) {
            Ok(message) => message,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Rejects deadlines the timer cannot hold; the caller gets the error.
        if let Err(e) = self.table.register(id, response_tx, timeout) {
            warn!(%id, error = %e, "Command rejected");
            return;
        }

        if let Err(e) = link.send(message) {
            warn!(%id, error = %e, "Failed to send command");
            self.table.fail(&id, e);
            return;
        }

        trace!(%id, method = %command.method(), "Command sent");
    }

    // ========================================================================
    // Inbound Messages
    // ========================================================================

    /// Routes an inbound message to the table or the status subscribers.
    fn dispatch(&mut self, message: Value) {
        let id = Incoming::peek_id(&message);

        match Incoming::from_value(message) {
            Ok(Incoming::Response(response)) => {
                let id = response.id;
                if !self.table.resolve(response) {
                    self.unmatched_responses += 1;
                    warn!(%id, "Response for unknown command");
                }
            }

            Ok(Incoming::StatusUpdate(update)) => {
                trace!(module = %update.module, status = %update.status, "Status update received");
                self.observers.status.notify(&update);
            }

            Err(e) => {
                self.malformed_messages += 1;

                // A broken reply to a pending command fails that command now.
                let failed = id.is_some_and(|id| {
                    self.table
                        .fail(&id, Error::protocol(format!("malformed response: {e}")))
                });
                if failed {
                    warn!(?id, error = %e, "Malformed response failed its command");
                } else {
                    warn!(error = %e, "Dropping malformed message");
                }
            }
        }
    }

    fn handle_transport_closed(&mut self) {
        self.link = None;

        let delay = self.machine.transport_closed();
        let failed = self.table.drain_all(|| Error::Disconnected);
        warn!(failed, "Native host channel closed");

        self.publish_state();
        self.observers.disconnect.notify(&());
        self.schedule_retry(delay);
    }

    // ========================================================================
    // Connection Lifecycle
    // ========================================================================

    /// Starts an open attempt in a separate task.
    fn start_open(&mut self, trigger: ConnectTrigger) {
        if let Err(e) = self.machine.begin_connect(trigger) {
            debug!(error = %e, "Open attempt refused");
            return;
        }
        self.publish_state();

        self.retry = None;
        self.opening = true;
        self.epoch += 1;

        let epoch = self.epoch;
        let transport = Arc::clone(&self.transport);
        let open_tx = self.open_tx.clone();

        debug!(epoch, ?trigger, "Opening native host channel");

        tokio::spawn(async move {
            let result = transport.open().await;
            let _ = open_tx.send(OpenOutcome { epoch, result });
        });
    }

    fn handle_open_outcome(&mut self, outcome: OpenOutcome) {
        let OpenOutcome { epoch, result } = outcome;

        if epoch != self.epoch || self.machine.state().is_destroyed() {
            debug!(epoch, "Discarding superseded open result");
            if let Ok(link) = result {
                link.close();
            }
            return;
        }

        self.opening = false;

        match result {
            Ok(link) => {
                if self.machine.open_succeeded().is_err() {
                    link.close();
                    return;
                }

                self.link = Some(link);
                info!("Connected to native host");

                self.publish_state();
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.observers.connect.notify(&());
            }

            Err(e) => {
                let message = match e {
                    Error::Connect { message } => message,
                    other => other.to_string(),
                };

                let delay = self.machine.open_failed();
                warn!(
                    error = %message,
                    attempt = self.machine.backoff().attempts(),
                    "Failed to open native host channel"
                );

                self.publish_state();
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(Error::connect(message.clone())));
                }
                self.schedule_retry(delay);
            }
        }
    }

    fn schedule_retry(&mut self, delay: Option<Duration>) {
        match delay {
            Some(delay) => {
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.machine.backoff().attempts(),
                    "Reconnect scheduled"
                );
                self.retry = Some(Box::pin(sleep(delay)));
            }
            None => {
                self.retry = None;
                error!(
                    attempts = self.machine.backoff().attempts(),
                    "Reconnect attempts exhausted, waiting for connect()"
                );
            }
        }
    }

    fn destroy(&mut self) {
        if !self.machine.destroy() {
            return;
        }

        self.epoch += 1;
        self.opening = false;
        self.retry = None;

        let failed = self.table.drain_all(|| Error::Disconnected);
        if let Some(link) = self.link.take() {
            link.close();
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(Error::Destroyed));
        }

        self.observers.clear();
        self.publish_state();

        info!(failed, "Bridge destroyed");
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    fn stats(&self) -> BridgeStats {
        BridgeStats {
            pending: self.table.len(),
            unmatched_responses: self.unmatched_responses,
            malformed_messages: self.malformed_messages,
            reconnect_attempts: self.machine.backoff().attempts(),
        }
    }
}
