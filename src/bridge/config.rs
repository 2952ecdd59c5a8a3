//! Bridge configuration.
//!
//! Provides a type-safe, serde-loadable configuration for command deadlines
//! and the reconnect policy.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use proxxy_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::new()
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_max_reconnect_attempts(3);
//!
//! let from_settings = BridgeConfig::from_json(r#"{ "commandTimeoutMs": 10000 }"#)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution (30s).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest accepted command deadline (30 days). The deadline timer wheel
/// cannot represent much more than two years.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Delay before the first automatic reconnect.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for any reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Automatic reconnects before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ============================================================================
// BridgeConfig
// ============================================================================

/// Command bridge configuration.
///
/// Durations are stored in milliseconds so the struct maps directly onto
/// persisted settings (`camelCase` keys, every field optional).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Default per-command deadline.
    pub command_timeout_ms: u64,

    /// Delay before the first automatic reconnect; doubles per attempt.
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for reconnect delays.
    pub reconnect_max_delay_ms: u64,

    /// Consecutive automatic reconnects before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a config with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY.as_millis() as u64,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY.as_millis() as u64,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the JSON is malformed
    /// - [`Error::Config`] if the values are inconsistent
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Sets the default command deadline.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = duration_millis(timeout);
        self
    }

    /// Sets the first reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay_ms = duration_millis(delay);
        self
    }

    /// Sets the reconnect delay cap.
    #[inline]
    #[must_use]
    pub fn with_reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay_ms = duration_millis(delay);
        self
    }

    /// Sets how many automatic reconnects run before giving up.
    ///
    /// Zero disables automatic reconnects.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl BridgeConfig {
    /// Default command deadline.
    #[inline]
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// First reconnect delay.
    #[inline]
    #[must_use]
    pub const fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Reconnect delay cap.
    #[inline]
    #[must_use]
    pub const fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the command timeout or base delay is
    /// zero, the command timeout exceeds [`MAX_COMMAND_TIMEOUT`], or the base
    /// delay exceeds the cap.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(Error::config("commandTimeoutMs must be greater than zero"));
        }

        if self.command_timeout() > MAX_COMMAND_TIMEOUT {
            return Err(Error::config(format!(
                "commandTimeoutMs ({}) exceeds the maximum of {}",
                self.command_timeout_ms,
                MAX_COMMAND_TIMEOUT.as_millis()
            )));
        }

        if self.reconnect_base_delay_ms == 0 {
            return Err(Error::config(
                "reconnectBaseDelayMs must be greater than zero",
            ));
        }

        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(Error::config(format!(
                "reconnectBaseDelayMs ({}) exceeds reconnectMaxDelayMs ({})",
                self.reconnect_base_delay_ms, self.reconnect_max_delay_ms
            )));
        }

        Ok(())
    }
}

#[inline]
fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
