//! Listening service lifecycle.
//!
//! A [`Server`] owns one listener and moves through
//! `Created → Started → Stopped`. Every transport-specific server (REST,
//! metrics, health) holds one and delegates start/stop to it.
//!
//! # Guarantees
//! - `start` binds at most once, however many tasks call it
//! - the assigned address is published at most once
//! - `stop` is idempotent and may race with `start`, `serve` and itself
//! - after `stop` the listener is closed, forcibly once the grace period ends
//! - a transport error observed after `stop` is reported as a clean exit

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, watch, Mutex};

use crate::config::ServerConfig;
use crate::net::{ListenerError, ListenerHandle};

const DEFAULT_NAME: &str = "server";

/// Time a transport gets to return after stop before it is dropped.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// Receiver of the address a server was bound to.
pub type AddrAssigned = oneshot::Receiver<SocketAddr>;

/// Error type for lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The listener could not be opened. Fatal, not retried.
    #[error("failed to start listener for {name}: {source}")]
    ListenerStart {
        name: String,
        #[source]
        source: ListenerError,
    },

    /// The transport failed for a reason other than `stop`.
    #[error("{name} failed serving on {address}: {source}")]
    Serve {
        name: String,
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `serve` was called while another `serve` holds the listener.
    #[error("{name} is already serving")]
    AlreadyServing { name: String },

    /// `serve` was called after a start that failed to open a listener.
    #[error("{name} has no listener")]
    NoListener { name: String },
}

/// Resolves once the owning server has been stopped.
///
/// Handed to every [`Transport`] so it can drain and return.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Wait for the server to stop. Also resolves if the server is dropped.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Whether stop has already been requested.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

/// A protocol-specific server driven by a [`Server`].
///
/// `serve` must only return on a fatal error or after `stop` resolves. The
/// transport never binds on its own and owns the listener it is given: the
/// socket closes when `serve` returns. A transport still running once the
/// stop grace period has passed is dropped, which closes it too.
pub trait Transport: Send {
    fn serve(
        self,
        listener: TcpListener,
        stop: StopSignal,
    ) -> impl Future<Output = io::Result<()>> + Send;
}

impl Transport for axum::Router {
    async fn serve(self, listener: TcpListener, stop: StopSignal) -> io::Result<()> {
        let app = self.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(stop.wait())
            .await
    }
}

struct State {
    started: bool,
    stopped: bool,
    serving: bool,
    listener: Option<ListenerHandle>,
    addr_tx: Option<oneshot::Sender<SocketAddr>>,
    shutdown: Option<(broadcast::Receiver<()>, oneshot::Sender<()>)>,
}

struct Inner {
    name: String,
    config: ServerConfig,
    /// Whether `stop` releases the socket. False only for supplied listeners
    /// the caller keeps ownership of.
    owns_listener: bool,
    stop_grace: Duration,
    addr: OnceLock<SocketAddr>,
    state: Mutex<State>,
    stop_tx: watch::Sender<bool>,
    addr_rx: std::sync::Mutex<Option<AddrAssigned>>,
}

/// A listening service with exactly-once start and idempotent stop.
///
/// Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

/// Typed construction options for a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    listener: Option<(ListenerHandle, bool)>,
    addr_assigned: bool,
    stop_grace: Duration,
    shutdown: Option<(broadcast::Receiver<()>, oneshot::Sender<()>)>,
}

impl ServerBuilder {
    /// Serve on an already opened listener instead of binding `host:port`.
    ///
    /// With `close_on_stop = false` the server never closes the socket: the
    /// transport receives a duplicate and the original stays open.
    pub fn with_listener(mut self, listener: ListenerHandle, close_on_stop: bool) -> Self {
        self.listener = Some((listener, close_on_stop));
        self
    }

    /// Publish the bound address once started; take the receiver with
    /// [`Server::addr_assigned`]. Mainly used with port 0.
    pub fn with_addr_assigned(mut self) -> Self {
        self.addr_assigned = true;
        self
    }

    /// How long `serve` waits for the transport after stop before dropping
    /// it. Defaults to [`DEFAULT_STOP_GRACE`].
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Stop when `shutdown` fires, then signal `done`.
    pub fn with_shutdown_signal(
        mut self,
        shutdown: broadcast::Receiver<()>,
        done: oneshot::Sender<()>,
    ) -> Self {
        self.shutdown = Some((shutdown, done));
        self
    }

    pub fn build(self) -> Server {
        let name = if self.config.name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            self.config.name.clone()
        };

        let (listener, owns_listener) = match self.listener {
            Some((listener, close_on_stop)) => (Some(listener), close_on_stop),
            None => (None, true),
        };

        let (addr_tx, addr_rx) = if self.addr_assigned {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (stop_tx, _) = watch::channel(false);

        let addr = OnceLock::new();
        if let Some(listener) = &listener {
            let _ = addr.set(listener.local_addr());
        }

        Server {
            inner: Arc::new(Inner {
                name,
                config: self.config,
                owns_listener,
                stop_grace: self.stop_grace,
                addr,
                state: Mutex::new(State {
                    started: false,
                    stopped: false,
                    serving: false,
                    listener,
                    addr_tx,
                    shutdown: self.shutdown,
                }),
                stop_tx,
                addr_rx: std::sync::Mutex::new(addr_rx),
            }),
        }
    }
}

impl Server {
    /// Create a server that binds `config.host:config.port` on start.
    pub fn new(config: ServerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            listener: None,
            addr_assigned: false,
            stop_grace: DEFAULT_STOP_GRACE,
            shutdown: None,
        }
    }

    /// Service name, `"server"` when none was configured.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bound address; `None` until start has resolved it.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.inner.addr.get().copied()
    }

    /// Take the address notifier. Returns `None` if it was not requested or
    /// was already taken.
    pub fn addr_assigned(&self) -> Option<AddrAssigned> {
        self.inner
            .addr_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// A future resolving once this server is stopped.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            rx: self.inner.stop_tx.subscribe(),
        }
    }

    /// Open the listener and publish its address. Idempotent; does not serve.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut state = self.inner.state.lock().await;

        if state.started {
            return Ok(());
        }
        if state.stopped {
            tracing::debug!(name = %self.inner.name, "Start after stop ignored");
            return Ok(());
        }

        state.started = true;

        if state.listener.is_none() {
            let listener = match ListenerHandle::bind_config(&self.inner.config).await {
                Ok(listener) => listener,
                Err(source) => {
                    // Waiters see a closed notifier instead of hanging.
                    state.addr_tx = None;
                    tracing::error!(name = %self.inner.name, error = %source, "Bind failed");
                    return Err(LifecycleError::ListenerStart {
                        name: self.inner.name.clone(),
                        source,
                    });
                }
            };
            let _ = self.inner.addr.set(listener.local_addr());
            state.listener = Some(listener);
        }

        let addr = self.addr();

        if let (Some(tx), Some(addr)) = (state.addr_tx.take(), addr) {
            // The receiver may have been dropped; nobody is waiting then.
            let _ = tx.send(addr);
            tracing::debug!(name = %self.inner.name, address = %addr, "Address published");
        }

        if let Some((signal, done)) = state.shutdown.take() {
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_shutdown(signal, done).await;
            });
        }

        tracing::info!(
            name = %self.inner.name,
            address = ?addr,
            "Server started"
        );

        Ok(())
    }

    /// Start, then serve on the listener with `transport` until it returns.
    ///
    /// Errors caused by `stop` are reported as `Ok(())`.
    pub async fn serve<T: Transport>(&self, transport: T) -> Result<(), LifecycleError> {
        self.start().await?;

        let (listener, address) = {
            let mut state = self.inner.state.lock().await;

            if state.stopped {
                return Ok(());
            }
            if state.serving {
                return Err(LifecycleError::AlreadyServing {
                    name: self.inner.name.clone(),
                });
            }

            let handle = if self.inner.owns_listener {
                state.listener.take()
            } else {
                state
                    .listener
                    .as_ref()
                    .map(ListenerHandle::try_clone)
                    .transpose()
                    .map_err(|source| LifecycleError::ListenerStart {
                        name: self.inner.name.clone(),
                        source,
                    })?
            };

            let handle = handle.ok_or_else(|| LifecycleError::NoListener {
                name: self.inner.name.clone(),
            })?;
            let address = handle.local_addr();
            let listener = handle
                .into_tokio()
                .map_err(|source| LifecycleError::ListenerStart {
                    name: self.inner.name.clone(),
                    source,
                })?;

            state.serving = true;
            (listener, address)
        };

        tracing::info!(name = %self.inner.name, address = %address, "Serving");

        let result = {
            let serving = transport.serve(listener, self.stop_signal());
            tokio::pin!(serving);

            let stop = self.stop_signal();
            let grace = self.inner.stop_grace;

            tokio::select! {
                result = &mut serving => result,
                _ = async {
                    stop.wait().await;
                    tokio::time::sleep(grace).await;
                } => {
                    tracing::warn!(
                        name = %self.inner.name,
                        address = %address,
                        grace = ?grace,
                        "Transport still running after stop, dropping it"
                    );
                    Ok(())
                }
            }
        };

        let mut state = self.inner.state.lock().await;
        state.serving = false;

        match result {
            Ok(()) => {
                tracing::info!(name = %self.inner.name, address = %address, "Stopped serving");
                Ok(())
            }
            Err(e) if state.stopped => {
                tracing::debug!(
                    name = %self.inner.name,
                    address = %address,
                    error = %e,
                    "Transport closed by stop"
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    name = %self.inner.name,
                    address = %address,
                    error = %source,
                    "Transport failed"
                );
                Err(LifecycleError::Serve {
                    name: self.inner.name.clone(),
                    address,
                    source,
                })
            }
        }
    }

    /// Stop the server. Idempotent and safe before start.
    pub async fn stop(&self) {
        let released = {
            let mut state = self.inner.state.lock().await;

            if state.stopped {
                return;
            }
            state.stopped = true;
            state.addr_tx = None;

            if self.inner.owns_listener {
                state.listener.take()
            } else {
                None
            }
        };

        // Dropping the handle closes a listener no transport has taken yet.
        drop(released);
        self.inner.stop_tx.send_replace(true);

        tracing::info!(name = %self.inner.name, "Server stopped");
    }

    /// Whether `stop` has been called.
    pub async fn is_stopped(&self) -> bool {
        self.inner.state.lock().await.stopped
    }

    async fn handle_shutdown(&self, mut signal: broadcast::Receiver<()>, done: oneshot::Sender<()>) {
        // A closed or lagged channel counts as the signal too.
        let _ = signal.recv().await;

        tracing::info!(name = %self.inner.name, "Shutdown signal received");
        self.stop().await;

        let _ = done.send(());
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
