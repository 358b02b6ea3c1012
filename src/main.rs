//! Service supervisor (v1)
//!
//! Runs a REST API, a Prometheus metrics server and a probe server in one
//! process, each under its own lifecycle, all stopped by one shutdown signal.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                      PROCESS                          │
//!                 │                                                       │
//!  Client ───────▶│  ┌───────────┐   ┌──────────────┐   ┌─────────────┐   │
//!                 │  │ lifecycle │──▶│ rate_limit   │──▶│  handlers   │   │
//!                 │  │ (REST)    │   │ (client-id)  │   │             │   │
//!                 │  └───────────┘   └──────────────┘   └─────────────┘   │
//!                 │                                                       │
//!  Prometheus ───▶│  ┌───────────┐   collectors: build_info, rate_limiter │
//!                 │  │ lifecycle │                                        │
//!                 │  │ (metrics) │                                        │
//!                 │  └───────────┘                                        │
//!                 │                                                       │
//!  Kubelet ──────▶│  ┌───────────┐   checks: rest-check, metrics-check    │
//!                 │  │ lifecycle │                                        │
//!                 │  │ (health)  │                                        │
//!                 │  └───────────┘                                        │
//!                 │                                                       │
//!                 │  SIGTERM/SIGINT → Shutdown → stop all → done signals  │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use axum::{http::HeaderMap, middleware, routing::get, Router};
use clap::{Parser, ValueEnum};
use tokio::task::JoinSet;

use servers::config::loader::{apply_env_overrides, ConfigError, ENV_PREFIX};
use servers::config::validation::validate_config;
use servers::config::{load_config, AppConfig, LogFormat};
use servers::health::HealthServer;
use servers::http::{root_handler, version_handler, Link, RestServer};
use servers::lifecycle::{signals, LifecycleError, Shutdown};
use servers::observability::{init_logging, MetricsServer};
use servers::security::{client_id, rate_limit_middleware, PerClientRateLimiter};
use servers::version;

/// Deadline for every service to report it has stopped.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "servers")]
#[command(about = "REST, metrics and health servers under one supervisor", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log format.
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,
}

fn load(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = AppConfig::default();
            apply_env_overrides(&mut config, ENV_PREFIX)?;
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };

    if let Some(format) = cli.log_format {
        config.observability.log_format = format.into();
    }

    Ok(config)
}

async fn hello(headers: HeaderMap) -> String {
    format!("Hello, {}!\n", client_id(&headers))
}

fn app_router(config: &AppConfig, limiter: Arc<PerClientRateLimiter>) -> Router {
    let mut api = Router::new().route("/hello", get(hello));
    if config.rate_limit.enabled {
        api = api.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    let links = vec![Link::new("hello", "/hello"), Link::new("version", "/version")];

    Router::new()
        .route("/", get(root_handler(config.rest.name.clone(), links)))
        .route("/version", get(version_handler))
        .merge(api)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let build = version::init();

    let config = load(&cli)?;
    init_logging(&config.observability)?;

    tracing::info!(
        version = build.version,
        revision = build.revision,
        "servers starting"
    );
    tracing::info!(
        rest = %format!("{}:{}", config.rest.host, config.rest.port),
        metrics = %format!("{}:{}", config.metrics.host, config.metrics.port),
        health = %format!("{}:{}", config.health.host, config.health.port),
        rate_limit_enabled = config.rate_limit.enabled,
        requests_per_second = config.rate_limit.requests_per_second,
        burst_size = config.rate_limit.burst_size,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let limiter = Arc::new(PerClientRateLimiter::from_config(&config.rate_limit));

    let (signal, done) = shutdown.register();
    let rest = RestServer::builder(config.rest.clone(), app_router(&config, limiter.clone()))
        .with_shutdown_signal(signal, done)
        .build();

    let (signal, done) = shutdown.register();
    let metrics = MetricsServer::builder(config.metrics.clone())
        .with_collector(limiter)?
        .with_shutdown_signal(signal, done)
        .build();

    // Bind first so the probe server knows where the others listen.
    rest.lifecycle().start().await?;
    metrics.lifecycle().start().await?;

    let mut health = HealthServer::builder(config.health.clone());
    if let Some(addr) = rest.addr() {
        health = health.with_rest_probe(addr)?;
    }
    if let Some(addr) = metrics.addr() {
        health = health.with_tcp_probe("metrics-check", addr)?;
    }
    let (signal, done) = shutdown.register();
    let health = health.with_shutdown_signal(signal, done).build();

    let mut tasks: JoinSet<Result<(), LifecycleError>> = JoinSet::new();
    {
        let rest = rest.clone();
        tasks.spawn(async move { rest.start().await });
    }
    {
        let metrics = metrics.clone();
        tasks.spawn(async move { metrics.start().await });
    }
    {
        let health = health.clone();
        tasks.spawn(async move { health.start().await });
    }

    tokio::select! {
        _ = signals::shutdown_signal() => {}
        Some(exited) = tasks.join_next() => {
            tracing::error!(result = ?exited, "A server exited before shutdown was requested");
        }
    }

    if let Err(e) = shutdown.trigger_and_wait(SHUTDOWN_TIMEOUT).await {
        tracing::error!(error = %e, "Graceful shutdown incomplete");
    }

    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed = true;
                tracing::error!(error = %e, "Server failed");
            }
            Err(e) => {
                failed = true;
                tracing::error!(error = %e, "Server task panicked");
            }
        }
    }

    tracing::info!("Shutdown complete");

    if failed {
        return Err("one or more servers failed".into());
    }
    Ok(())
}
