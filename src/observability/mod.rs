//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (Collector implementations, refreshed per scrape)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → MetricsServer /metrics (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every HTTP server
//! - Metrics are cheap (atomic counters read at scrape time)

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{BuildInfoCollector, Collector, MetricsError, MetricsServer, MetricsServerBuilder};
