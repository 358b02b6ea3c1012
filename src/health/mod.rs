//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Probe request (GET /health)
//!     → server.rs (HealthServer, composed over RestServer)
//!     → checks.rs (run every check concurrently, each with a timeout)
//!     → HealthReport (OK / Partially Available / Unavailable)
//! ```
//!
//! # Design Decisions
//! - Checks are registered at construction; duplicates are an error
//! - skip_on_err checks degrade the status instead of failing it

pub mod checks;
pub mod server;

pub use checks::{CheckError, Component, HealthCheck, HealthChecks, HealthError, HealthReport, Status};
pub use server::{HealthServer, HealthServerBuilder};
