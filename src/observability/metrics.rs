//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the [`Collector`] contract for components exposing metrics
//! - Serve a Prometheus text exposition on `/metrics`
//! - Reject two collectors registered under one name
//!
//! # Metrics
//! - `build_info` (gauge): always 1, labelled with version, revision, branch
//! - `rate_limiter_*`: see `security::rate_limit`
//!
//! # Design Decisions
//! - Each server renders from its own recorder; no global recorder is installed
//! - Collectors are refreshed right before each scrape

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

use crate::config::ServerConfig;
use crate::http::{root_handler, Link, RestServer, RestServerBuilder};
use crate::lifecycle::{AddrAssigned, LifecycleError, Server};
use crate::net::ListenerHandle;
use crate::version;

/// Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Error type for metrics server construction.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("collector already registered: {name}")]
    DuplicateRegistration { name: String },
}

/// A source of metrics, refreshed before every scrape.
///
/// `collect` records through the `metrics` macros; the scraping server
/// routes them to its own recorder.
pub trait Collector: Send + Sync + 'static {
    /// Unique name within one metrics server.
    fn name(&self) -> &str;

    fn collect(&self);
}

/// Exposes [`version::info`] as the `build_info` gauge.
#[derive(Debug, Default)]
pub struct BuildInfoCollector;

impl Collector for BuildInfoCollector {
    fn name(&self) -> &str {
        "build_info"
    }

    fn collect(&self) {
        let info = version::info();
        metrics::gauge!(
            "build_info",
            "version" => info.version,
            "revision" => info.revision,
            "branch" => info.branch
        )
        .set(1.0);
    }
}

struct MetricsState {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    collectors: Vec<Arc<dyn Collector>>,
}

impl MetricsState {
    fn render(&self) -> String {
        metrics::with_local_recorder(&self.recorder, || {
            for collector in &self.collectors {
                collector.collect();
            }
        });
        self.handle.render()
    }
}

async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.render())
}

/// A listening HTTP server exposing Prometheus metrics.
#[derive(Clone)]
pub struct MetricsServer {
    rest: RestServer,
}

/// Typed construction options for a [`MetricsServer`].
pub struct MetricsServerBuilder {
    name: String,
    rest: RestServerBuilder,
    collectors: Vec<Arc<dyn Collector>>,
    registered: HashSet<String>,
}

impl MetricsServerBuilder {
    /// Add a collector. Fails if one with the same name is already present.
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Result<Self, MetricsError> {
        let name = collector.name().to_string();
        if !self.registered.insert(name.clone()) {
            return Err(MetricsError::DuplicateRegistration { name });
        }

        self.collectors.push(collector);
        Ok(self)
    }

    pub fn with_collectors(
        self,
        collectors: impl IntoIterator<Item = Arc<dyn Collector>>,
    ) -> Result<Self, MetricsError> {
        collectors
            .into_iter()
            .try_fold(self, |builder, collector| builder.with_collector(collector))
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

    pub fn build(self) -> MetricsServer {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let state = Arc::new(MetricsState {
            recorder,
            handle,
            collectors: self.collectors,
        });

        let router = Router::new()
            .route(
                "/",
                get(root_handler(self.name, vec![Link::new("metrics", "/metrics")])),
            )
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        MetricsServer {
            rest: self.rest.with_router(router).build(),
        }
    }
}

impl MetricsServer {
    /// Builder with the build-info collector already registered.
    pub fn builder(config: ServerConfig) -> MetricsServerBuilder {
        let name = if config.name.is_empty() {
            "metrics".to_string()
        } else {
            config.name.clone()
        };

        let build_info: Arc<dyn Collector> = Arc::new(BuildInfoCollector);

        MetricsServerBuilder {
            name,
            rest: RestServer::builder(config, Router::new()),
            registered: HashSet::from([build_info.name().to_string()]),
            collectors: vec![build_info],
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
