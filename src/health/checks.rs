//! Dependency health checks.
//!
//! # Responsibilities
//! - Keep a registry of named async checks
//! - Run them concurrently, each under its own timeout
//! - Aggregate the results into a report
//!
//! # Aggregation
//! ```text
//! every check passes                  → OK                  (200)
//! only skip_on_err checks fail        → Partially Available (200)
//! any other check fails or times out  → Unavailable         (503)
//! ```

use axum::http::StatusCode;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::version;

/// Timeout applied to a check unless configured otherwise.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for health registry construction.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("health check already registered: {name}")]
    DuplicateRegistration { name: String },
}

/// Why a single check failed.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote service is not available at the moment (status {0})")]
    Status(u16),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CheckError>> + Send + Sync>;

/// A named dependency check.
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    timeout: Duration,
    skip_on_err: bool,
    check: CheckFn,
}

impl HealthCheck {
    pub fn new<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CheckError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            timeout: DEFAULT_CHECK_TIMEOUT,
            skip_on_err: false,
            check: Arc::new(move || check().boxed()),
        }
    }

    /// Passes when a GET on `url` answers with a status below 500.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let client = reqwest::Client::new();
        let url = url.into();

        Self::new(name, move || {
            let request = client.get(url.clone());
            async move {
                let response = request.send().await?;
                if response.status().is_server_error() {
                    return Err(CheckError::Status(response.status().as_u16()));
                }
                Ok::<(), CheckError>(())
            }
        })
    }

    /// Passes when a TCP connection to `addr` can be opened.
    pub fn tcp(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self::new(name, move || async move {
            tokio::net::TcpStream::connect(addr).await?;
            Ok::<(), CheckError>(())
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A failing check degrades the report instead of failing it.
    pub fn skip_on_err(mut self, skip: bool) -> Self {
        self.skip_on_err = skip;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), CheckError> {
        match tokio::time::timeout(self.timeout, (self.check)()).await {
            Ok(result) => result,
            Err(_) => Err(CheckError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("skip_on_err", &self.skip_on_err)
            .finish_non_exhaustive()
    }
}

/// Aggregated health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Partially Available")]
    PartiallyAvailable,
    #[serde(rename = "Unavailable")]
    Unavailable,
}

impl Status {
    pub fn http_status(self) -> StatusCode {
        match self {
            Status::Ok | Status::PartiallyAvailable => StatusCode::OK,
            Status::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// The component reporting its health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub name: String,
    pub version: String,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version::info().version.to_string(),
        }
    }
}

/// Result of running every registered check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
    pub component: Component,
}

/// Registry of health checks for one component.
#[derive(Debug, Clone)]
pub struct HealthChecks {
    component: Component,
    checks: Vec<HealthCheck>,
}

impl HealthChecks {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            checks: Vec::new(),
        }
    }

    /// Add a check. Names must be unique.
    pub fn register(&mut self, check: HealthCheck) -> Result<(), HealthError> {
        if self.checks.iter().any(|c| c.name == check.name) {
            return Err(HealthError::DuplicateRegistration { name: check.name });
        }

        self.checks.push(check);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check concurrently and aggregate.
    pub async fn measure(&self) -> HealthReport {
        let results = join_all(self.checks.iter().map(|check| async move {
            (check, check.run().await)
        }))
        .await;

        let mut status = Status::Ok;
        let mut failures = BTreeMap::new();

        for (check, result) in results {
            let Err(e) = result else { continue };

            tracing::warn!(check = %check.name, error = %e, "Health check failed");
            failures.insert(check.name.clone(), e.to_string());

            if check.skip_on_err {
                if status == Status::Ok {
                    status = Status::PartiallyAvailable;
                }
            } else {
                status = Status::Unavailable;
            }
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        HealthReport {
            status,
            timestamp,
            failures,
            component: self.component.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing(name: &str) -> HealthCheck {
        HealthCheck::new(name, || async { Ok::<(), CheckError>(()) })
    }

    fn failing(name: &str) -> HealthCheck {
        HealthCheck::new(name, || async { Err(CheckError::Failed("down".into())) })
    }

    #[tokio::test]
    async fn test_all_passing_is_ok() {
        let mut checks = HealthChecks::new(Component::new("svc"));
        checks.register(passing("a")).unwrap();
        checks.register(passing("b")).unwrap();

        let report = checks.measure().await;
        assert_eq!(report.status, Status::Ok);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_skip_on_err_degrades() {
        let mut checks = HealthChecks::new(Component::new("svc"));
        checks.register(passing("a")).unwrap();
        checks.register(failing("cache").skip_on_err(true)).unwrap();

        let report = checks.measure().await;
        assert_eq!(report.status, Status::PartiallyAvailable);
        assert_eq!(report.status.http_status(), StatusCode::OK);
        assert_eq!(report.failures.get("cache").map(String::as_str), Some("down"));
    }

    #[tokio::test]
    async fn test_hard_failure_is_unavailable() {
        let mut checks = HealthChecks::new(Component::new("svc"));
        checks.register(failing("cache").skip_on_err(true)).unwrap();
        checks.register(failing("db")).unwrap();

        let report = checks.measure().await;
        assert_eq!(report.status, Status::Unavailable);
        assert_eq!(report.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut checks = HealthChecks::new(Component::new("svc"));
        checks
            .register(
                HealthCheck::new("slow", || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), CheckError>(())
                })
                .with_timeout(Duration::from_millis(20)),
            )
            .unwrap();

        let report = checks.measure().await;
        assert_eq!(report.status, Status::Unavailable);
        assert!(report.failures["slow"].contains("timed out"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut checks = HealthChecks::new(Component::new("svc"));
        checks.register(passing("a")).unwrap();
        let err = checks.register(passing("a")).unwrap_err();
        assert!(matches!(err, HealthError::DuplicateRegistration { ref name } if name == "a"));
        assert_eq!(checks.len(), 1);
    }

    #[test]
    fn test_report_serialization() {
        let report = HealthReport {
            status: Status::PartiallyAvailable,
            timestamp: 1,
            failures: BTreeMap::new(),
            component: Component {
                name: "svc".into(),
                version: "1.0.0".into(),
            },
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "Partially Available");
        assert!(json.get("failures").is_none());
        assert_eq!(json["component"]["version"], "1.0.0");
    }
}
