//! Inbound message types.
//!
//! The native host sends two shapes of message: responses, which carry the
//! `id` of the command they answer, and status updates, which carry no `id`.
//! [`Incoming::from_value`] tells them apart by shape alone.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

use super::StatusUpdate;

// ============================================================================
// Response
// ============================================================================

/// A reply from the native host to exactly one command.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "uuid", "success": true, "data": { ... } }
/// ```
///
/// Error:
/// ```json
/// { "id": "uuid", "success": false, "error": "error message" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Outcome flag.
    pub success: bool,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error message (if not success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn ok(id: CommandId, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn err(id: CommandId, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Extracts the data, returning error if the host reported failure.
    ///
    /// Missing data on success yields `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] if `success` is false.
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            let message = self
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            Err(Error::command(message))
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to a command.
    Response(Response),
    /// Unsolicited event.
    StatusUpdate(StatusUpdate),
}

impl Incoming {
    /// Reads a message's `id` without decoding the rest of it.
    ///
    /// Returns `None` if there is no `id` or it is not a UUID string.
    #[must_use]
    pub fn peek_id(message: &Value) -> Option<CommandId> {
        let id = message.get("id")?.as_str()?;
        Uuid::parse_str(id).ok().map(CommandId::from_uuid)
    }

    /// Classifies and decodes an inbound message.
    ///
    /// A message with an `id` field is a response. A message without `id`
    /// but with `module` and `status` is a status update.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the message matches neither shape
    /// - [`Error::Json`] if a field has the wrong type
    pub fn from_value(message: Value) -> Result<Self> {
        let Some(object) = message.as_object() else {
            return Err(Error::protocol("inbound message is not a JSON object"));
        };

        if object.contains_key("id") {
            return Ok(Self::Response(serde_json::from_value(message)?));
        }

        if object.contains_key("module") && object.contains_key("status") {
            return Ok(Self::StatusUpdate(serde_json::from_value(message)?));
        }

        Err(Error::protocol(
            "inbound message has neither id nor module/status",
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
