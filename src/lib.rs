//! Proxxy bridge - command channel between a browser extension and its
//! native helper process.
//!
//! This library multiplexes request/response commands and unsolicited
//! status updates over one native messaging channel, and keeps that channel
//! alive.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐                     ┌──────────────────┐
//! │  CommandBridge            │   native messaging  │  Native host     │
//! │  - correlation table      │◄───────────────────►│  (proxxy helper) │
//! │  - reconnect with backoff │   4-byte length +   │  har / lsr /     │
//! │  - status subscribers     │   UTF-8 JSON        │  system modules  │
//! └───────────────────────────┘                     └──────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - One event loop task owns the connection; handles talk to it by message
//! - Commands are addressed as `module.action`
//! - Messages with an `id` are responses; messages without one are status
//!   updates
//! - Every command ends exactly once: data, host error, timeout, or
//!   disconnect
//!
//! # Quick Start
//!
//! ```no_run
//! use proxxy_bridge::{CommandBridge, LsrStart, NativeHostTransport, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = NativeHostTransport::from_manifest(
//!         "/etc/proxxy/com.proxxy.native.json",
//!         "chrome-extension://abcdefghijklmnopabcdefghijklmnop/",
//!     );
//!     let bridge = CommandBridge::new(transport);
//!
//!     bridge.on_status_update(|update| {
//!         println!("{} {}: {}", update.module, update.status, update.data);
//!     });
//!     bridge.on_disconnect(|| eprintln!("native host went away"));
//!
//!     bridge.connect().await?;
//!     bridge.call(LsrStart::new("https://example.com")).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`CommandBridge`], correlation, reconnect policy |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types and typed actions |
//! | [`transport`] | Native host and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Command bridge: correlation, lifecycle, subscribers.
///
/// Use [`CommandBridge::new`] with any [`Transport`] to get started.
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for commands and subscriptions.
pub mod identifiers;

/// Native messaging message types.
///
/// Commands, responses, status updates, and typed actions.
pub mod protocol;

/// Transport layer.
///
/// Opens message channels to the native host.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{BridgeConfig, BridgeStats, CommandBridge, ConnectionState};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CommandId, SubscriptionId};

// Protocol types
pub use protocol::{
    Action, Command, HarStart, HarStop, LsrStart, LsrStop, Module, Ping, RecordingState,
    Response, StatusUpdate,
};

// Transport types
pub use transport::{
    HostEnd, Link, MemoryHost, MemoryTransport, NativeHostConfig, NativeHostManifest,
    NativeHostTransport, Transport,
};
