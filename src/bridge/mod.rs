//! Command bridge.
//!
//! This module multiplexes request/response commands and unsolicited status
//! updates over one [`Link`](crate::transport::Link), and keeps that link
//! alive.
//!
//! # Architecture
//!
//! ```text
//! CommandBridge (clone) ──┐
//! CommandBridge (clone) ──┼── BridgeCommand ──► EventLoop ◄──► Link ◄──► native host
//! CommandBridge (clone) ──┘                       │
//!                                                 ├── CorrelationTable (id → caller)
//!                                                 ├── ConnectionStateMachine + Backoff
//!                                                 └── Observers (connect / disconnect / status)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | Timeouts and reconnect policy |
//! | `core` | Public [`CommandBridge`] handle |
//! | `correlation` | Pending command table |
//! | `event_loop` | Task that owns the connection |
//! | `observer` | Subscriber registries |
//! | `state` | Connection lifecycle and backoff |

// ============================================================================
// Submodules
// ============================================================================

/// Bridge configuration.
pub mod config;

/// Public bridge handle.
pub mod core;

/// Pending command table.
pub mod correlation;

/// Connection event loop.
mod event_loop;

/// Subscriber registries.
pub mod observer;

/// Connection state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::BridgeConfig;
pub use core::CommandBridge;
pub use correlation::CorrelationTable;
pub use event_loop::BridgeStats;
pub use observer::{Callback, ObserverRegistry, Observers};
pub use state::{Backoff, ConnectTrigger, ConnectionState, ConnectionStateMachine};
