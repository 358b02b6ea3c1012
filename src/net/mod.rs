//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerConfig (host, port) ──┐
//!                             ├─→ listener.rs (bind / adopt, resolve address)
//! caller-supplied socket ─────┘       → lifecycle::Server (owns the handle)
//!                                     → Transport::serve (tokio listener)
//! ```
//!
//! # Design Decisions
//! - Sockets are stored in std form so shared listeners can be duplicated
//! - The bound address is resolved once, when the handle is created

pub mod listener;

pub use listener::{ListenerError, ListenerHandle};
