//! Transport trait and open channel handle.
//!
//! A [`Transport`] knows how to reach exactly one external process. Each
//! successful [`Transport::open`] yields a [`Link`]: a send half plus a
//! receiver of inbound messages. The receiver yielding `None` is the
//! disconnect signal.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

// ============================================================================
// Transport
// ============================================================================

/// Opens message channels to the native host.
///
/// Implementations hold no retry or correlation logic.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the native host is not reachable,
    /// installed, or registered.
    async fn open(&self) -> Result<Link>;
}

// ============================================================================
// Link
// ============================================================================

/// One open channel to the native host.
///
/// Dropping the link closes the channel.
#[derive(Debug)]
pub struct Link {
    /// Outbound messages.
    outbound: mpsc::UnboundedSender<Value>,
    /// Inbound messages; `None` once the channel is closed.
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl Link {
    /// Creates a link from its two channel halves.
    #[inline]
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<Value>,
        inbound: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Enqueues a message for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the channel is closed.
    pub fn send(&self, message: Value) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::NotConnected)
    }

    /// Receives the next inbound message.
    ///
    /// Returns `None` when the channel has closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Returns `true` if the writing side has gone away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Tears down the channel.
    #[inline]
    pub fn close(self) {
        drop(self);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn test_link_round_trip() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut link = Link::new(out_tx, in_rx);

        link.send(json!({ "a": 1 })).expect("send");
        assert_eq!(out_rx.recv().await, Some(json!({ "a": 1 })));

        in_tx.send(json!({ "b": 2 })).expect("deliver");
        assert_eq!(link.recv().await, Some(json!({ "b": 2 })));

        drop(in_tx);
        assert_eq!(link.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_remote_close_fails() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let link = Link::new(out_tx, in_rx);

        drop(out_rx);
        assert!(link.is_closed());
        assert!(matches!(
            assert_err!(link.send(json!(null))),
            Error::NotConnected
        ));
    }

    #[test]
    fn test_recv_pending_until_message() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut link = Link::new(out_tx, in_rx);

        let mut recv = task::spawn(link.recv());
        assert_pending!(recv.poll());

        in_tx.send(json!("status")).expect("deliver");
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(json!("status")));
    }

    #[tokio::test]
    async fn test_close_drops_outbound() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let link = Link::new(out_tx, in_rx);

        link.close();
        assert_eq!(out_rx.recv().await, None);
    }
}
