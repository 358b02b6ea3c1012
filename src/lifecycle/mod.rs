//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (server.rs):
//!     Bind or adopt listener → Publish address → Spawn shutdown watcher
//!     → Transport::serve (blocks until stop)
//!
//! Shutdown (shutdown.rs):
//!     Signal broadcast → each watcher calls stop → done signals → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Start binds exactly once; stop is idempotent
//! - Errors caused by stop are not errors
//! - Shutdown has timeout: waiting for services gives up after a deadline

pub mod server;
pub mod shutdown;
pub mod signals;

pub use server::{
    AddrAssigned, LifecycleError, Server, ServerBuilder, StopSignal, Transport, DEFAULT_STOP_GRACE,
};
pub use shutdown::{Shutdown, ShutdownTimeout};
