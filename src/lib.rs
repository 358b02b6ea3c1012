//! Supervised listening services and per-client admission control.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod version;

pub use config::AppConfig;
pub use health::HealthServer;
pub use http::RestServer;
pub use lifecycle::{LifecycleError, Server, Shutdown, Transport};
pub use net::ListenerHandle;
pub use observability::MetricsServer;
pub use security::PerClientRateLimiter;
