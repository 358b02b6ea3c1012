//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! lifecycle::Server (listener)
//!     → rest.rs (Axum router as Transport, graceful shutdown on stop)
//!     → request.rs (add / propagate request ID)
//!     → [security::rate_limit middleware, per route]
//!     → handlers.rs (root page, version) or application handlers
//! ```

pub mod handlers;
pub mod request;
pub mod rest;

pub use handlers::{root_handler, version_handler, Link};
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use rest::{RestServer, RestServerBuilder};
