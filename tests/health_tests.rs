//! Probe server tests against live REST servers.

use std::net::SocketAddr;
use std::time::Duration;
use axum::{http::StatusCode, routing::get, Router};

use servers::health::{HealthCheck, HealthServer, HealthServerBuilder};
use servers::http::RestServer;

mod common;

async fn spawn_rest(router: Router) -> (RestServer, SocketAddr) {
    let rest = RestServer::builder(common::ephemeral("api"), router)
        .with_addr_assigned()
        .build();
    let assigned = rest.addr_assigned().unwrap();

    let serving = rest.clone();
    tokio::spawn(async move { serving.start().await });

    (rest, assigned.await.unwrap())
}

async fn spawn_health(builder: HealthServerBuilder) -> (HealthServer, SocketAddr) {
    let health = builder.with_addr_assigned().build();
    let assigned = health.addr_assigned().unwrap();

    let serving = health.clone();
    tokio::spawn(async move { serving.start().await });

    (health, assigned.await.unwrap())
}

#[tokio::test]
async fn test_healthy_rest_probe() {
    let (rest, rest_addr) = spawn_rest(Router::new().route("/", get(|| async { "up" }))).await;

    let builder = HealthServer::builder(common::ephemeral(""))
        .with_rest_probe(rest_addr)
        .unwrap();
    let (health, addr) = spawn_health(builder).await;
    assert_eq!(health.name(), "health");

    let client = common::client();
    let response = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let report: serde_json::Value = response.json().await.unwrap();
    assert_eq!(report["status"], "OK");
    assert_eq!(report["component"]["name"], "health");
    assert!(report.get("failures").is_none());

    let root = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(root.status(), 200);
    assert!(root.text().await.unwrap().contains("Welcome to health"));

    health.stop().await;
    rest.stop().await;
}

#[tokio::test]
async fn test_root_mirrors_rest_status() {
    let router = Router::new().route("/", get(|| async { StatusCode::IM_A_TEAPOT }));
    let (rest, rest_addr) = spawn_rest(router).await;

    let builder = HealthServer::builder(common::ephemeral("probe"))
        .with_rest_probe(rest_addr)
        .unwrap();
    let (health, addr) = spawn_health(builder).await;

    let client = common::client();
    let root = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(root.status(), StatusCode::IM_A_TEAPOT.as_u16());

    rest.stop().await;
    assert!(common::wait_refused(rest_addr).await);

    let root = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(root.status(), 503);

    let response = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let report: serde_json::Value = response.json().await.unwrap();
    assert_eq!(report["status"], "Unavailable");
    assert!(report["failures"]["rest-check"].is_string());

    health.stop().await;
}

#[tokio::test]
async fn test_optional_check_degrades() {
    let builder = HealthServer::builder(common::ephemeral("probe"))
        .with_tcp_probe("cache", common::unused_addr())
        .unwrap()
        .with_check(
            HealthCheck::tcp("search", common::unused_addr())
                .with_timeout(Duration::from_secs(1))
                .skip_on_err(true),
        )
        .unwrap();
    let (health, addr) = spawn_health(builder).await;

    let report: serde_json::Value = common::client()
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // A required failure wins over an optional one.
    assert_eq!(report["status"], "Unavailable");
    assert!(report["failures"]["cache"].is_string());
    assert!(report["failures"]["search"].is_string());

    health.stop().await;
}

#[tokio::test]
async fn test_only_optional_failures_partially_available() {
    let builder = HealthServer::builder(common::ephemeral("probe"))
        .with_check(HealthCheck::tcp("search", common::unused_addr()).skip_on_err(true))
        .unwrap();
    let (health, addr) = spawn_health(builder).await;

    let response = common::client()
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let report: serde_json::Value = response.json().await.unwrap();
    assert_eq!(report["status"], "Partially Available");

    health.stop().await;
}
