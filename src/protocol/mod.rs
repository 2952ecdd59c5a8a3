//! Native host protocol message types.
//!
//! This module defines the JSON messages exchanged between the bridge and
//! the native host.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Command` | Bridge → Host | Request |
//! | `Response` | Host → Bridge | Reply to one command, matched by `id` |
//! | `StatusUpdate` | Host → Bridge | Unsolicited notification, no `id` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command, module tags and typed actions |
//! | `event` | Status update type |
//! | `response` | Response type and inbound classification |

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions and typed actions.
pub mod command;

/// Status update message type.
pub mod event;

/// Response type and inbound message classification.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    Action, Command, HarStart, HarStop, LsrStart, LsrStop, Module, Ping, RecordingState,
};
pub use event::StatusUpdate;
pub use response::{Incoming, Response};
