//! Transport layer.
//!
//! This module opens message channels between the bridge and the native
//! host. It knows nothing about correlation or retries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  CommandBridge  │                              │  Native Host    │
//! │                 │     length-prefixed JSON     │  (helper        │
//! │  Transport      │◄────────────────────────────►│   process)      │
//! │  → Link         │        stdin / stdout        │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Native messaging frame codec |
//! | `link` | `Transport` trait and `Link` channel handle |
//! | `memory` | In-process transport for tests and scripted hosts |
//! | `native` | Native host process transport |

// ============================================================================
// Submodules
// ============================================================================

/// Native messaging frame codec.
pub mod codec;

/// Transport trait and channel handle.
pub mod link;

/// In-process transport.
pub mod memory;

/// Native host process transport.
pub mod native;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::NativeMessageCodec;
pub use link::{Link, Transport};
pub use memory::{HostEnd, MemoryHost, MemoryTransport};
pub use native::{NativeHostConfig, NativeHostManifest, NativeHostTransport};
