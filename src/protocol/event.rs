//! Status update messages.
//!
//! Status updates are unsolicited notifications pushed by the native host.
//! They are not correlated with any command.
//!
//! # Known Statuses
//!
//! | Module | Statuses |
//! |--------|----------|
//! | `har` | `recording_started`, `recording_stopped`, `entry_captured` |
//! | `lsr` | `recording_started`, `step_recorded`, `recording_stopped` |
//!
//! The bridge forwards every status verbatim; the table above is not enforced.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Module;

// ============================================================================
// StatusUpdate
// ============================================================================

/// An event notification from the native host.
///
/// # Format
///
/// ```json
/// {
///   "module": "lsr",
///   "status": "step_recorded",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Module that emitted the update.
    pub module: Module,

    /// What changed.
    pub status: String,

    /// Status-specific data. Absent data decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl StatusUpdate {
    /// Creates a new status update.
    #[inline]
    #[must_use]
    pub fn new(module: Module, status: impl Into<String>, data: Value) -> Self {
        Self {
            module,
            status: status.into(),
            data,
        }
    }

    /// Returns `true` if the update is from `module` with `status`.
    #[inline]
    #[must_use]
    pub fn is(&self, module: Module, status: &str) -> bool {
        self.module == module && self.status == status
    }

    /// Gets a string value from the data.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Gets a u64 value from the data.
    ///
    /// Returns 0 if key not found or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.data
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
