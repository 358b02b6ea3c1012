//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (client-id header → per-client token bucket)
//!         denied  → 429 RESOURCE_EXHAUSTED, handler not called
//!         allowed → pass to handler unchanged
//! ```
//!
//! # Design Decisions
//! - Denial is an expected outcome, not a fault
//! - No retry here; retry policy belongs to the client

pub mod rate_limit;

pub use rate_limit::{
    client_id, rate_limit_middleware, PerClientRateLimiter, RateLimited, TokenBucket,
    CLIENT_ID_HEADER, UNKNOWN_CLIENT,
};
