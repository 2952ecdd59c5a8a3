//! Error types for the command bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use proxxy_bridge::{CommandBridge, Module, Result};
//! use serde_json::json;
//!
//! async fn start_capture(bridge: &CommandBridge) -> Result<()> {
//!     bridge.connect().await?;
//!     bridge
//!         .send_command(Module::Har, "start", Some(json!({ "filter": "all" })))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connect`], [`Error::NotConnected`], [`Error::Disconnected`], [`Error::Destroyed`] |
//! | Command | [`Error::Command`], [`Error::CommandTimeout`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`] |
//!
//! UI code usually only needs three questions answered:
//! [`Error::is_connection_error`] ("not connected, please retry"),
//! [`Error::is_command_error`] ("command failed with message X") and
//! [`Error::is_timeout`] ("timed out, safe to resubmit").

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::CommandId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge or native host configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The channel to the native host could not be opened.
    ///
    /// Usually means the helper is not installed or not registered.
    #[error("Connect failed: {message}")]
    Connect {
        /// Description of the connect failure.
        message: String,
    },

    /// A command was sent while no channel was open.
    #[error("Not connected to native host")]
    NotConnected,

    /// An in-flight command was invalidated by losing the channel.
    #[error("Disconnected from native host")]
    Disconnected,

    /// The bridge was shut down with `disconnect()`.
    #[error("Bridge destroyed")]
    Destroyed,

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// The native host answered with `success: false`.
    #[error("Command failed: {message}")]
    Command {
        /// Error message reported by the native host.
        message: String,
    },

    /// No response arrived before the command deadline.
    #[error("Command {command_id} timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command that timed out.
        command_id: CommandId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connect error.
    #[inline]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a command error from the native host's message.
    #[inline]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(command_id: CommandId, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            command_id,
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a command timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. })
    }

    /// Returns `true` if the native host rejected the command.
    #[inline]
    #[must_use]
    pub fn is_command_error(&self) -> bool {
        matches!(self, Self::Command { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::NotConnected | Self::Disconnected | Self::Destroyed
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the command is resubmitted.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. } | Self::NotConnected | Self::Disconnected
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
