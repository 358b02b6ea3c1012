//! Liveness/readiness probe server.
//!
//! # Endpoints
//! - `GET /`: welcome page; when a REST server is probed, mirrors its status
//! - `GET /health`: JSON [`HealthReport`] of every registered check

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

use crate::config::ServerConfig;
use crate::health::checks::{
    Component, HealthCheck, HealthChecks, HealthError, DEFAULT_CHECK_TIMEOUT,
};
use crate::http::handlers::root_page;
use crate::http::{RestServer, RestServerBuilder};
use crate::lifecycle::{AddrAssigned, LifecycleError, Server};
use crate::net::ListenerHandle;

/// Name of the check registered by [`HealthServerBuilder::with_rest_probe`].
pub const REST_CHECK: &str = "rest-check";

struct HealthState {
    welcome: String,
    client: reqwest::Client,
    probe_url: Option<String>,
    checks: HealthChecks,
}

async fn root(State(state): State<Arc<HealthState>>) -> Response {
    let Some(url) = &state.probe_url else {
        return Html(state.welcome.clone()).into_response();
    };

    match state.client.get(url).send().await {
        Ok(response) => (response.status(), Html(state.welcome.clone())).into_response(),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "REST probe failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn health(State(state): State<Arc<HealthState>>) -> Response {
    let report = state.checks.measure().await;
    (report.status.http_status(), Json(report)).into_response()
}

/// Address a local client can reach: unspecified IPs become loopback.
fn reachable(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}

/// A listening HTTP server answering Kubernetes-style probes.
#[derive(Clone)]
pub struct HealthServer {
    rest: RestServer,
}

/// Typed construction options for a [`HealthServer`].
pub struct HealthServerBuilder {
    name: String,
    rest: RestServerBuilder,
    checks: HealthChecks,
    probe_url: Option<String>,
}

impl HealthServerBuilder {
    /// Add a dependency check. Names must be unique.
    pub fn with_check(mut self, check: HealthCheck) -> Result<Self, HealthError> {
        self.checks.register(check)?;
        Ok(self)
    }

    /// Probe a running REST server: `/` mirrors its status and `/health`
    /// gains a `rest-check`.
    pub fn with_rest_probe(mut self, addr: SocketAddr) -> Result<Self, HealthError> {
        let url = format!("http://{}", reachable(addr));

        self.checks
            .register(HealthCheck::http(REST_CHECK, url.clone()).with_timeout(DEFAULT_CHECK_TIMEOUT))?;
        self.probe_url = Some(url);
        Ok(self)
    }

    /// Check that a TCP service accepts connections.
    pub fn with_tcp_probe(
        self,
        name: impl Into<String>,
        addr: SocketAddr,
    ) -> Result<Self, HealthError> {
        self.with_check(HealthCheck::tcp(name, reachable(addr)))
    }

    pub fn with_listener(mut self, listener: ListenerHandle, close_on_stop: bool) -> Self {
        self.rest = self.rest.with_listener(listener, close_on_stop);
        self
    }

    pub fn with_addr_assigned(mut self) -> Self {
        self.rest = self.rest.with_addr_assigned();
        self
    }

    pub fn with_shutdown_signal(
        mut self,
        shutdown: broadcast::Receiver<()>,
        done: oneshot::Sender<()>,
    ) -> Self {
        self.rest = self.rest.with_shutdown_signal(shutdown, done);
        self
    }

    pub fn build(self) -> HealthServer {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CHECK_TIMEOUT)
            .build()
            .unwrap_or_default();

        let state = Arc::new(HealthState {
            welcome: root_page(&self.name, &[]),
            client,
            probe_url: self.probe_url,
            checks: self.checks,
        });

        let router = Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .with_state(state);

        HealthServer {
            rest: self.rest.with_router(router).build(),
        }
    }
}

impl HealthServer {
    pub fn builder(config: ServerConfig) -> HealthServerBuilder {
        let name = if config.name.is_empty() {
            "health".to_string()
        } else {
            config.name.clone()
        };

        HealthServerBuilder {
            checks: HealthChecks::new(Component::new(name.clone())),
            name,
            rest: RestServer::builder(config, Router::new()),
            probe_url: None,
        }
    }

    /// Start serving. Blocks until the server stops or fails.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.rest.start().await
    }

    pub async fn stop(&self) {
        self.rest.stop().await;
    }

    pub fn name(&self) -> &str {
        self.rest.name()
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.rest.addr()
    }

    pub fn addr_assigned(&self) -> Option<AddrAssigned> {
        self.rest.addr_assigned()
    }

    pub fn lifecycle(&self) -> &Server {
        self.rest.lifecycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_rewrites_unspecified() {
        let any: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(reachable(any), "127.0.0.1:8080".parse().unwrap());

        let v6_any: SocketAddr = "[::]:8080".parse().unwrap();
        assert_eq!(reachable(v6_any), "127.0.0.1:8080".parse().unwrap());

        let local: SocketAddr = "10.0.0.1:80".parse().unwrap();
        assert_eq!(reachable(local), local);
    }

    #[test]
    fn test_rest_probe_registers_check() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let builder = HealthServer::builder(ServerConfig::default())
            .with_rest_probe(addr)
            .unwrap();
        assert_eq!(builder.checks.len(), 1);

        let err = builder
            .with_check(HealthCheck::tcp(REST_CHECK, addr))
            .err()
            .unwrap();
        assert!(err.to_string().contains(REST_CHECK));
    }
}
