//! REST server.
//!
//! # Responsibilities
//! - Wrap an Axum router with request ID, tracing and timeout layers
//! - Serve it on a lifecycle-managed listener
//! - Delegate start/stop to the owned [`Server`]

use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::request::MakeRequestUuid;
use crate::lifecycle::{AddrAssigned, LifecycleError, Server, ServerBuilder};
use crate::net::ListenerHandle;

/// Default time budget for one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A listening HTTP server.
#[derive(Clone)]
pub struct RestServer {
    server: Server,
    router: Router,
}

/// Typed construction options for a [`RestServer`].
pub struct RestServerBuilder {
    server: ServerBuilder,
    router: Router,
    request_timeout: Duration,
}

impl RestServerBuilder {
    pub fn with_listener(mut self, listener: ListenerHandle, close_on_stop: bool) -> Self {
        self.server = self.server.with_listener(listener, close_on_stop);
        self
    }

    pub fn with_addr_assigned(mut self) -> Self {
        self.server = self.server.with_addr_assigned();
        self
    }

    pub fn with_shutdown_signal(
        mut self,
        shutdown: broadcast::Receiver<()>,
        done: oneshot::Sender<()>,
    ) -> Self {
        self.server = self.server.with_shutdown_signal(shutdown, done);
        self
    }

    /// Replace the router to serve.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[allow(deprecated)]
    pub fn build(self) -> RestServer {
        let router = self.router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(self.request_timeout)),
        );

        RestServer {
            server: self.server.build(),
            router,
        }
    }
}

impl RestServer {
    pub fn builder(config: ServerConfig, router: Router) -> RestServerBuilder {
        RestServerBuilder {
            server: Server::builder(config),
            router,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Start serving. Blocks until the server stops or fails.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.server.serve(self.router.clone()).await
    }

    /// Stop serving. In-flight requests are drained by the transport.
    pub async fn stop(&self) {
        self.server.stop().await;
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.server.addr()
    }

    pub fn addr_assigned(&self) -> Option<AddrAssigned> {
        self.server.addr_assigned()
    }

    /// The underlying lifecycle.
    pub fn lifecycle(&self) -> &Server {
        &self.server
    }
}
