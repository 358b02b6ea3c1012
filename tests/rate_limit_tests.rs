//! Per-client admission over a live REST server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::{middleware, routing::get, Router};

use servers::http::RestServer;
use servers::security::{rate_limit_middleware, PerClientRateLimiter};

mod common;

async fn limited_server(limiter: Arc<PerClientRateLimiter>) -> (RestServer, SocketAddr) {
    let router = Router::new()
        .route("/hello", get(|| async { "hello" }))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    let rest = RestServer::builder(common::ephemeral("limited"), router)
        .with_addr_assigned()
        .build();
    let assigned = rest.addr_assigned().unwrap();

    let serving = rest.clone();
    tokio::spawn(async move { serving.start().await });

    (rest, assigned.await.unwrap())
}

async fn hello(client: &reqwest::Client, addr: SocketAddr, id: &str) -> reqwest::Response {
    client
        .get(format!("http://{addr}/hello"))
        .header("client-id", id)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_burst_then_deny_then_refill() {
    let limiter = Arc::new(PerClientRateLimiter::new(2.0, 2));
    let (rest, addr) = limited_server(limiter.clone()).await;
    let client = common::client();

    assert_eq!(hello(&client, addr, "alice").await.status(), 200);
    assert_eq!(hello(&client, addr, "alice").await.status(), 200);

    let denied = hello(&client, addr, "alice").await;
    assert_eq!(denied.status(), 429);
    let body: serde_json::Value = denied.json().await.unwrap();
    assert_eq!(body["code"], 429);
    assert_eq!(body["status"], "RESOURCE_EXHAUSTED");
    assert_eq!(body["details"]["client"], "alice");
    assert!(body["message"].as_str().unwrap().contains("alice"));
    assert!(!body["error_id"].as_str().unwrap().is_empty());

    // Another client has its own quota.
    assert_eq!(hello(&client, addr, "bob").await.status(), 200);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(hello(&client, addr, "alice").await.status(), 200);

    assert_eq!(limiter.client_count(), 2);
    assert_eq!(limiter.denied_total(), 1);
    assert_eq!(limiter.admitted_total(), 4);

    rest.stop().await;
}

#[tokio::test]
async fn test_missing_client_id_shares_one_bucket() {
    let limiter = Arc::new(PerClientRateLimiter::new(0.001, 1));
    let (rest, addr) = limited_server(limiter.clone()).await;
    let client = common::client();
    let url = format!("http://{addr}/hello");

    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 429);

    assert_eq!(limiter.client_count(), 1);

    rest.stop().await;
}
