//! Connection state machine and reconnect backoff.
//!
//! Pure bookkeeping: the bridge event loop asks the machine what to do and
//! performs the side effects (opening the transport, arming timers).
//!
//! # Transitions
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open ok──► Connected
//!      ▲                          │                       │
//!      │ budget exhausted     open failed           transport closed
//!      │                          ▼                       ▼
//!      └────────────────── (retry scheduled) ◄──── Reconnecting
//!
//! any state ──destroy()──► Destroyed (terminal)
//! ```
//!
//! # Backoff
//!
//! Retry `n` (1-indexed) waits `min(base * 2^(n-1), max)`. With the default
//! 1s base and 30s cap that is 1s, 2s, 4s, 8s, 16s; after the fifth failed
//! retry no further retry is scheduled until `connect()` is called again.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

use super::BridgeConfig;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the bridge's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No channel and no attempt in flight (a retry may be scheduled).
    #[default]
    Disconnected,
    /// Caller-initiated open in flight.
    Connecting,
    /// Channel open.
    Connected,
    /// Channel lost; automatic reopen pending or in flight.
    Reconnecting,
    /// Shut down. Terminal.
    Destroyed,
}

impl ConnectionState {
    /// Returns `true` if commands can be sent.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` once the bridge is shut down.
    #[inline]
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential reconnect backoff with an attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff policy.
    #[inline]
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    /// Creates the policy described by `config`.
    #[inline]
    #[must_use]
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.reconnect_base_delay(),
            config.reconnect_max_delay(),
            config.max_reconnect_attempts,
        )
    }

    /// Delay before retry `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64);
        let millis = self
            .base
            .as_millis()
            .saturating_mul(1u128 << exponent)
            .min(self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Counts a retry and returns its delay, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    /// Retries scheduled since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `true` if no automatic retry is left.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Restores the full budget.
    #[inline]
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

// ============================================================================
// ConnectTrigger
// ============================================================================

/// Who started an open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTrigger {
    /// `connect()` called by the user. Resets the backoff budget.
    Manual,
    /// Backoff timer fired.
    Automatic,
}

// ============================================================================
// ConnectionStateMachine
// ============================================================================

/// Connection lifecycle plus reconnect policy.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    backoff: Backoff,
}

impl ConnectionStateMachine {
    /// Creates a machine in [`ConnectionState::Disconnected`].
    #[inline]
    #[must_use]
    pub const fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect policy and counter.
    #[inline]
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// An open attempt is starting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] after [`Self::destroy`].
    pub fn begin_connect(&mut self, trigger: ConnectTrigger) -> Result<()> {
        if self.state.is_destroyed() {
            return Err(Error::Destroyed);
        }

        self.state = match trigger {
            ConnectTrigger::Manual => {
                self.backoff.reset();
                ConnectionState::Connecting
            }
            ConnectTrigger::Automatic => ConnectionState::Reconnecting,
        };
        Ok(())
    }

    /// The open attempt produced a channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] after [`Self::destroy`].
    pub fn open_succeeded(&mut self) -> Result<()> {
        if self.state.is_destroyed() {
            return Err(Error::Destroyed);
        }

        self.state = ConnectionState::Connected;
        self.backoff.reset();
        Ok(())
    }

    /// The open attempt failed. Returns the delay before the next automatic
    /// attempt, or `None` if no retry should be scheduled.
    pub fn open_failed(&mut self) -> Option<Duration> {
        if self.state.is_destroyed() {
            return None;
        }

        let delay = self.backoff.next_delay();
        self.state = match (self.state, delay) {
            (ConnectionState::Reconnecting, Some(_)) => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        };
        delay
    }

    /// The open channel closed on its own. Returns the delay before the
    /// first reconnect, or `None` if reconnecting is disabled.
    ///
    /// Ignored unless connected.
    pub fn transport_closed(&mut self) -> Option<Duration> {
        if !self.state.is_connected() {
            return None;
        }

        let delay = self.backoff.next_delay();
        self.state = if delay.is_some() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };
        delay
    }

    /// Enters the terminal state. Returns `false` if already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.state.is_destroyed() {
            return false;
        }
        self.state = ConnectionState::Destroyed;
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(Backoff::from_config(&BridgeConfig::default()))
    }

    #[test]
    fn test_default_backoff_sequence() {
        let mut backoff = Backoff::from_config(&BridgeConfig::default());
        let delays: Vec<u128> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis())
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 10);
        assert_eq!(backoff.delay_for(5), Duration::from_secs(16));
        assert_eq!(backoff.delay_for(6), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(60), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 2);
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_manual_connect_then_success() {
        let mut machine = default_machine();
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        machine
            .begin_connect(ConnectTrigger::Manual)
            .expect("connect");
        assert_eq!(machine.state(), ConnectionState::Connecting);

        machine.open_succeeded().expect("open");
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_failed_manual_connect_schedules_retries_until_cap() {
        let mut machine = default_machine();
        machine
            .begin_connect(ConnectTrigger::Manual)
            .expect("connect");

        assert_eq!(machine.open_failed(), Some(Duration::from_secs(1)));
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        let mut delays = Vec::new();
        loop {
            machine
                .begin_connect(ConnectTrigger::Automatic)
                .expect("retry");
            assert_eq!(machine.state(), ConnectionState::Reconnecting);
            match machine.open_failed() {
                Some(delay) => delays.push(delay.as_secs()),
                None => break,
            }
        }

        assert_eq!(delays, vec![2, 4, 8, 16]);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.backoff().is_exhausted());
    }

    #[test]
    fn test_manual_connect_resets_exhausted_budget() {
        let mut machine = ConnectionStateMachine::new(Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            1,
        ));
        machine
            .begin_connect(ConnectTrigger::Manual)
            .expect("connect");
        assert!(machine.open_failed().is_some());
        machine
            .begin_connect(ConnectTrigger::Automatic)
            .expect("retry");
        assert!(machine.open_failed().is_none());

        machine
            .begin_connect(ConnectTrigger::Manual)
            .expect("connect");
        assert_eq!(machine.backoff().attempts(), 0);
        assert_eq!(machine.open_failed(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_transport_closed_enters_reconnecting() {
        let mut machine = default_machine();
        machine
            .begin_connect(ConnectTrigger::Manual)
            .expect("connect");
        machine.open_succeeded().expect("open");

        assert_eq!(machine.transport_closed(), Some(Duration::from_secs(1)));
        assert_eq!(machine.state(), ConnectionState::Reconnecting);

        machine
            .begin_connect(ConnectTrigger::Automatic)
            .expect("retry");
        machine.open_succeeded().expect("open");
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert_eq!(machine.backoff().attempts(), 0);
    }

    #[test]
    fn test_transport_closed_ignored_when_not_connected() {
        let mut machine = default_machine();
        assert_eq!(machine.transport_closed(), None);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_destroy_is_terminal() {
        let mut machine = default_machine();
        machine
            .begin_connect(ConnectTrigger::Manual)
            .expect("connect");

        assert!(machine.destroy());
        assert!(!machine.destroy());
        assert_eq!(machine.state(), ConnectionState::Destroyed);

        assert!(matches!(
            machine.begin_connect(ConnectTrigger::Manual),
            Err(Error::Destroyed)
        ));
        assert!(matches!(machine.open_succeeded(), Err(Error::Destroyed)));
        assert_eq!(machine.open_failed(), None);
        assert_eq!(machine.state(), ConnectionState::Destroyed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    proptest! {
        #[test]
        fn prop_delays_are_monotonic_and_capped(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            attempts in 1u32..40,
        ) {
            let max = Duration::from_millis(base_ms + extra_ms);
            let mut backoff = Backoff::new(Duration::from_millis(base_ms), max, attempts);

            let mut previous = Duration::ZERO;
            let mut count = 0;
            while let Some(delay) = backoff.next_delay() {
                prop_assert!(delay >= previous);
                prop_assert!(delay <= max);
                previous = delay;
                count += 1;
            }
            prop_assert_eq!(count, attempts);
        }

        #[test]
        fn prop_success_always_restores_budget(failures in 0u32..10) {
            let mut machine = default_machine();
            machine.begin_connect(ConnectTrigger::Manual).expect("connect");
            for _ in 0..failures {
                let _ = machine.open_failed();
                machine.begin_connect(ConnectTrigger::Automatic).expect("retry");
            }
            machine.open_succeeded().expect("open");
            prop_assert_eq!(machine.backoff().attempts(), 0);
            prop_assert_eq!(machine.state(), ConnectionState::Connected);
        }
    }
}
