//! Listener acquisition.
//!
//! # Responsibilities
//! - Bind to the configured host/port (port 0 = assigned by the OS)
//! - Adopt listeners opened elsewhere (std or tokio)
//! - Resolve the bound address once, at acquisition time
//! - Hand transports a tokio listener, or a duplicate when the socket is shared

use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::config::ServerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Failed to inspect or convert an already opened socket.
    #[error("listener socket error: {0}")]
    Socket(#[source] io::Error),
}

/// A bound TCP socket ready to accept connections.
///
/// The socket is kept in its std form (non-blocking) so it can be duplicated
/// for transports that must not take ownership of it.
#[derive(Debug)]
pub struct ListenerHandle {
    inner: std::net::TcpListener,
    local_addr: SocketAddr,
}

impl ListenerHandle {
    /// Bind to `host:port`. An empty host binds every interface.
    pub async fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let address = format!("{}:{}", host, port);

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        let handle = Self::from_tokio(listener)?;

        tracing::info!(
            requested = %address,
            address = %handle.local_addr,
            "Listener bound"
        );

        Ok(handle)
    }

    /// Bind using a server configuration.
    pub async fn bind_config(config: &ServerConfig) -> Result<Self, ListenerError> {
        Self::bind(&config.host, config.port).await
    }

    /// Adopt a std listener opened by the caller.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, ListenerError> {
        listener.set_nonblocking(true).map_err(ListenerError::Socket)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Socket)?;

        Ok(Self {
            inner: listener,
            local_addr,
        })
    }

    /// Adopt a tokio listener opened by the caller.
    pub fn from_tokio(listener: TcpListener) -> Result<Self, ListenerError> {
        let std_listener = listener.into_std().map_err(ListenerError::Socket)?;
        Self::from_std(std_listener)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Duplicate the underlying socket. Both handles accept on the same port;
    /// closing one leaves the other open.
    pub fn try_clone(&self) -> Result<Self, ListenerError> {
        let inner = self.inner.try_clone().map_err(ListenerError::Socket)?;
        Ok(Self {
            inner,
            local_addr: self.local_addr,
        })
    }

    /// Convert into a tokio listener. Must be called within a runtime.
    pub fn into_tokio(self) -> Result<TcpListener, ListenerError> {
        TcpListener::from_std(self.inner).map_err(ListenerError::Socket)
    }
}
