//! Correlation table for in-flight commands.
//!
//! Maps each pending [`CommandId`] to the channel that completes the
//! caller's future, plus a deadline in a [`DelayQueue`]. Every registered
//! entry leaves the table through exactly one terminal call:
//!
//! | Terminal call | Caller sees |
//! |---------------|-------------|
//! | [`CorrelationTable::resolve`] | response data or [`Error::Command`] |
//! | [`CorrelationTable::next_expired`] | [`Error::CommandTimeout`] |
//! | [`CorrelationTable::fail`] | the given error |
//! | [`CorrelationTable::drain_all`] | the drain reason |
//!
//! The table is owned by the bridge event loop and is never shared.

// ============================================================================
// Imports
// ============================================================================

use std::future::poll_fn;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::protocol::Response;

use super::config::MAX_COMMAND_TIMEOUT;

// ============================================================================
// Types
// ============================================================================

/// Completion channel for one command.
pub type Responder = oneshot::Sender<Result<Value>>;

/// Bookkeeping for one in-flight command.
#[derive(Debug)]
struct PendingEntry {
    /// Completes the caller's future.
    responder: Responder,
    /// Deadline registration.
    deadline: Key,
    /// Deadline length, reported on timeout.
    timeout: Duration,
}

impl PendingEntry {
    fn complete(self, result: Result<Value>) {
        // Receiver may already be dropped.
        let _ = self.responder.send(result);
    }
}

// ============================================================================
// CorrelationTable
// ============================================================================

/// In-flight commands awaiting a response.
///
/// Must be used inside a tokio runtime (deadlines use the tokio timer).
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: FxHashMap<CommandId, PendingEntry>,
    deadlines: DelayQueue<CommandId>,
}

impl CorrelationTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &CommandId) -> bool {
        self.entries.contains_key(id)
    }

    /// Registers a pending command and starts its deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if `id` is already registered; the existing
    ///   entry is left untouched
    /// - [`Error::Config`] if `timeout` exceeds [`MAX_COMMAND_TIMEOUT`]
    ///
    /// On error `responder` is completed with the same error.
    pub fn register(
        &mut self,
        id: CommandId,
        responder: Responder,
        timeout: Duration,
    ) -> Result<()> {
        if self.entries.contains_key(&id) {
            let message = format!("command id {id} already pending");
            let _ = responder.send(Err(Error::protocol(message.clone())));
            return Err(Error::protocol(message));
        }

        if timeout > MAX_COMMAND_TIMEOUT {
            let message = format!(
                "command timeout of {}ms exceeds the maximum of {}ms",
                timeout.as_millis(),
                MAX_COMMAND_TIMEOUT.as_millis()
            );
            let _ = responder.send(Err(Error::config(message.clone())));
            return Err(Error::config(message));
        }

        let deadline = self.deadlines.insert(id, timeout);
        self.entries.insert(
            id,
            PendingEntry {
                responder,
                deadline,
                timeout,
            },
        );

        trace!(%id, timeout_ms = timeout.as_millis() as u64, "Command registered");
        Ok(())
    }

    /// Completes the command matching `response.id`.
    ///
    /// Returns `false` (and does nothing) if the id is not pending: a late,
    /// duplicate, or unknown response.
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(entry) = self.take(&response.id) else {
            return false;
        };

        trace!(id = %response.id, success = response.success, "Command resolved");
        entry.complete(response.into_result());
        true
    }

    /// Fails a pending command with `error`.
    ///
    /// Returns `false` if the id is not pending.
    pub fn fail(&mut self, id: &CommandId, error: Error) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };

        entry.complete(Err(error));
        true
    }

    /// Waits for the next deadline and fails that command with
    /// [`Error::CommandTimeout`].
    ///
    /// Returns the expired id, or `None` immediately when nothing is pending.
    pub async fn next_expired(&mut self) -> Option<CommandId> {
        let expired = poll_fn(|cx| self.deadlines.poll_expired(cx)).await?;
        let id = expired.into_inner();
        self.timeout(id);
        Some(id)
    }

    /// Fails every pending command with `reason()`.
    ///
    /// Returns the number of failed commands. Calling it on an empty table
    /// is a no-op.
    pub fn drain_all(&mut self, reason: impl Fn() -> Error) -> usize {
        self.deadlines.clear();

        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.complete(Err(reason()));
        }

        if count > 0 {
            debug!(count, "Failed pending commands");
        }
        count
    }

    /// Deadline-driven terminal call. The deadline key is already consumed.
    fn timeout(&mut self, id: CommandId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };

        let timeout_ms = u64::try_from(entry.timeout.as_millis()).unwrap_or(u64::MAX);
        debug!(%id, timeout_ms, "Command timed out");
        entry.complete(Err(Error::command_timeout(id, timeout_ms)));
        true
    }

    /// Removes an entry and cancels its deadline.
    fn take(&mut self, id: &CommandId) -> Option<PendingEntry> {
        let entry = self.entries.remove(id)?;
        let _ = self.deadlines.try_remove(&entry.deadline);
        Some(entry)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::time::sleep;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn register(table: &mut CorrelationTable) -> (CommandId, oneshot::Receiver<Result<Value>>) {
        let id = CommandId::generate();
        let (tx, rx) = oneshot::channel();
        table.register(id, tx, TIMEOUT).expect("register");
        (id, rx)
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);

        assert!(table.resolve(Response::ok(id, json!({ "recording": true }))));
        assert!(table.is_empty());

        let data = rx.await.expect("completed").expect("success");
        assert_eq!(data, json!({ "recording": true }));
    }

    #[tokio::test]
    async fn test_resolve_error_response() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);

        assert!(table.resolve(Response::err(id, "no capture running")));

        let err = rx.await.expect("completed").unwrap_err();
        assert!(matches!(err, Error::Command { ref message } if message == "no capture running"));
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_responses_are_dropped() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);
        let (other, _other_rx) = register(&mut table);

        assert!(!table.resolve(Response::ok(CommandId::generate(), json!(null))));
        assert_eq!(table.len(), 2);

        assert!(table.resolve(Response::ok(id, json!(1))));
        assert!(!table.resolve(Response::ok(id, json!(2))));
        assert_eq!(rx.await.expect("completed").expect("success"), json!(1));

        assert!(table.contains(&other));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let mut table = CorrelationTable::new();
        let (id, first_rx) = register(&mut table);

        let (tx, rx) = oneshot::channel();
        assert!(table.register(id, tx, TIMEOUT).is_err());
        assert!(matches!(
            rx.await.expect("completed"),
            Err(Error::Protocol { .. })
        ));

        assert_eq!(table.len(), 1);
        assert!(table.resolve(Response::ok(id, json!("first"))));
        assert_eq!(first_rx.await.expect("completed").expect("ok"), json!("first"));
    }

    #[tokio::test]
    async fn test_register_rejects_overlong_timeout() {
        let mut table = CorrelationTable::new();
        let id = CommandId::generate();
        let (tx, rx) = oneshot::channel();

        let three_years = Duration::from_secs(3 * 365 * 24 * 60 * 60);
        assert!(matches!(
            table.register(id, tx, three_years),
            Err(Error::Config { .. })
        ));
        assert!(matches!(rx.await.expect("completed"), Err(Error::Config { .. })));
        assert!(table.is_empty());
        assert_eq!(table.next_expired().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_command_timeout() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);

        assert_eq!(table.next_expired().await, Some(id));
        assert!(table.is_empty());

        let err = rx.await.expect("completed").unwrap_err();
        assert!(matches!(
            err,
            Error::CommandTimeout { command_id, timeout_ms: 30_000 } if command_id == id
        ));

        // Late response after timeout is a no-op.
        assert!(!table.resolve(Response::ok(id, json!(null))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_fire_in_order() {
        let mut table = CorrelationTable::new();
        let (slow, fast) = (CommandId::generate(), CommandId::generate());
        let (slow_tx, _slow_rx) = oneshot::channel();
        let (fast_tx, _fast_rx) = oneshot::channel();
        table
            .register(slow, slow_tx, Duration::from_secs(10))
            .expect("register");
        table
            .register(fast, fast_tx, Duration::from_secs(1))
            .expect("register");

        assert_eq!(table.next_expired().await, Some(fast));
        assert_eq!(table.next_expired().await, Some(slow));
        assert_eq!(table.next_expired().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_entry_never_times_out() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);

        sleep(Duration::from_millis(500)).await;
        assert!(table.resolve(Response::ok(id, json!(true))));
        assert!(rx.await.expect("completed").is_ok());

        sleep(TIMEOUT * 2).await;
        assert_eq!(table.next_expired().await, None);
    }

    #[tokio::test]
    async fn test_drain_all_fails_everything_once() {
        let mut table = CorrelationTable::new();
        let (_, rx_a) = register(&mut table);
        let (_, rx_b) = register(&mut table);

        assert_eq!(table.drain_all(|| Error::Disconnected), 2);
        assert!(table.is_empty());
        assert_eq!(table.drain_all(|| Error::Disconnected), 0);

        assert!(matches!(rx_a.await.expect("completed"), Err(Error::Disconnected)));
        assert!(matches!(rx_b.await.expect("completed"), Err(Error::Disconnected)));

        // No deadline survives the drain.
        assert_eq!(table.next_expired().await, None);
    }

    #[tokio::test]
    async fn test_fail_single_entry() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);
        let (other, _rx) = register(&mut table);

        assert!(table.fail(&id, Error::NotConnected));
        assert!(!table.fail(&id, Error::NotConnected));
        assert!(table.contains(&other));
        assert!(matches!(rx.await.expect("completed"), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_break_resolve() {
        let mut table = CorrelationTable::new();
        let (id, rx) = register(&mut table);
        drop(rx);

        assert!(table.resolve(Response::ok(id, json!(null))));
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn prop_every_entry_terminates_once(resolved in proptest::collection::vec(any::<bool>(), 1..32)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .expect("runtime");

            rt.block_on(async {
                let mut table = CorrelationTable::new();
                let entries: Vec<_> = resolved.iter().map(|_| register(&mut table)).collect();

                for ((id, _), resolve) in entries.iter().zip(&resolved) {
                    if *resolve {
                        assert!(table.resolve(Response::ok(*id, json!(null))));
                    }
                }

                let remaining = resolved.iter().filter(|resolve| !**resolve).count();
                assert_eq!(table.drain_all(|| Error::Disconnected), remaining);
                assert!(table.is_empty());

                for ((_, rx), resolve) in entries.into_iter().zip(&resolved) {
                    let outcome = rx.await.expect("completed");
                    assert_eq!(outcome.is_ok(), *resolve);
                }
                assert_eq!(table.next_expired().await, None);
            });
        }
    }
}
