//! Outbound command definitions.
//!
//! A command names a `module` (the helper subsystem that handles it) and an
//! `action` within that module, plus an optional JSON payload.
//!
//! # Command Modules
//!
//! | Module | Actions |
//! |--------|---------|
//! | `system` | `ping` (reserved health check) |
//! | `har` | `start`, `stop` |
//! | `lsr` | `start`, `stop` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::CommandId;

// ============================================================================
// Module
// ============================================================================

/// Helper subsystem a command or status update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    /// Reserved bridge-level commands.
    System,
    /// HTTP archive capture.
    Har,
    /// Login-sequence recorder.
    Lsr,
}

impl Module {
    /// Returns the wire name of the module.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Har => "har",
            Self::Lsr => "lsr",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Command
// ============================================================================

/// A command from the bridge to the native host.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "module": "har",
///   "action": "start",
///   "payload": { "filter": "all" },
///   "timestamp": 1700000000000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique identifier for command/response correlation.
    pub id: CommandId,

    /// Target module.
    pub module: Module,

    /// Action within the module.
    pub action: String,

    /// Action-specific arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Creation time in milliseconds since the Unix epoch. Diagnostic only.
    #[serde(rename = "timestamp")]
    pub issued_at: u64,
}

impl Command {
    /// Creates a new command with a generated id.
    #[inline]
    #[must_use]
    pub fn new(module: Module, action: impl Into<String>, payload: Option<Value>) -> Self {
        Self::with_id(CommandId::generate(), module, action, payload)
    }

    /// Creates a new command with a specific id.
    #[must_use]
    pub fn with_id(
        id: CommandId,
        module: Module,
        action: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            id,
            module,
            action: action.into(),
            payload,
            issued_at: unix_millis(),
        }
    }

    /// Returns `module.action`, used in logs.
    #[inline]
    #[must_use]
    pub fn method(&self) -> String {
        format!("{}.{}", self.module, self.action)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

// ============================================================================
// Action
// ============================================================================

/// A typed command: fixed module and action name, typed payload and output.
///
/// The action value itself is serialized as the payload; unit structs send
/// no payload.
///
/// # Example
///
/// ```ignore
/// let state = bridge.call(HarStart::all()).await?;
/// assert!(state.recording);
/// ```
pub trait Action: Serialize {
    /// Module handling the action.
    const MODULE: Module;

    /// Action name within the module.
    const NAME: &'static str;

    /// Type the response `data` is decoded into.
    type Output: DeserializeOwned;
}

/// Reserved health check. A healthy native host answers with success.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Ping;

impl Action for Ping {
    const MODULE: Module = Module::System;
    const NAME: &'static str = "ping";
    type Output = Value;
}

/// Recording state reported by capture and recorder modules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RecordingState {
    /// Whether recording is active after the command.
    #[serde(default)]
    pub recording: bool,
}

/// Starts HAR capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarStart {
    /// Traffic filter understood by the native host (`"all"` captures everything).
    pub filter: String,
}

impl HarStart {
    /// Captures all traffic.
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self {
            filter: "all".to_string(),
        }
    }
}

impl Action for HarStart {
    const MODULE: Module = Module::Har;
    const NAME: &'static str = "start";
    type Output = RecordingState;
}

/// Stops HAR capture.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HarStop;

impl Action for HarStop {
    const MODULE: Module = Module::Har;
    const NAME: &'static str = "stop";
    type Output = RecordingState;
}

/// Starts recording a login sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LsrStart {
    /// Optional page the recording starts from.
    #[serde(rename = "startUrl", skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
}

impl LsrStart {
    /// Starts recording from `start_url`.
    #[inline]
    #[must_use]
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: Some(start_url.into()),
        }
    }
}

impl Action for LsrStart {
    const MODULE: Module = Module::Lsr;
    const NAME: &'static str = "start";
    type Output = RecordingState;
}

/// Stops recording a login sequence.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LsrStop;

impl Action for LsrStop {
    const MODULE: Module = Module::Lsr;
    const NAME: &'static str = "stop";
    type Output = RecordingState;
}

// ============================================================================
// Tests
// ============================================================================
