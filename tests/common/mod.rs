//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

use servers::config::ServerConfig;
use servers::lifecycle::{StopSignal, Transport};

/// Config for a loopback server on a kernel-assigned port.
pub fn ephemeral(name: &str) -> ServerConfig {
    ServerConfig::new(name, "127.0.0.1", 0)
}

/// A free loopback port. Nothing listens on it once this returns.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// HTTP client that never reuses connections across servers.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Accepts and drops connections. On stop it fails the way a transport
/// whose listener was closed underneath it does.
pub struct AcceptLoop;

impl Transport for AcceptLoop {
    async fn serve(self, listener: TcpListener, stop: StopSignal) -> io::Result<()> {
        let stopped = stop.wait();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => {
                    return Err(io::Error::other("use of closed network connection"));
                }
                accepted = listener.accept() => {
                    let (socket, _) = accepted?;
                    drop(socket);
                }
            }
        }
    }
}

/// Fails immediately without being stopped.
pub struct Broken;

impl Transport for Broken {
    async fn serve(self, _listener: TcpListener, _stop: StopSignal) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::ConnectionAborted, "transport broke"))
    }
}

/// Holds the listener and ignores stop.
pub struct Stubborn;

impl Transport for Stubborn {
    async fn serve(self, listener: TcpListener, _stop: StopSignal) -> io::Result<()> {
        let _held = listener;
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Poll until `addr` refuses connections or the deadline passes.
pub async fn wait_refused(addr: SocketAddr) -> bool {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_err() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
