use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::protocol::error::{OrthosError, Result};
use crate::protocol::{Request, RequestBody, Response};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp::TcpTransport;

/// Server lifecycle state broadcast to the accept loop and every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Running,
    /// Stop accepting, let in-flight requests finish.
    Graceful,
    /// Stop accepting and abort in-flight requests.
    Forced,
}

/// Cloneable handle used to stop a [`TcpServer`], locally or from a
/// `Shutdown` request received on the wire.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<ShutdownSignal>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ShutdownSignal::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn graceful(&self) {
        self.signal(ShutdownSignal::Graceful);
    }

    pub fn force(&self) {
        self.signal(ShutdownSignal::Forced);
    }

    /// A forced stop is never downgraded to a graceful one.
    pub fn signal(&self, signal: ShutdownSignal) {
        self.tx.send_if_modified(|current| {
            let escalate = match (*current, signal) {
                (ShutdownSignal::Forced, _) => false,
                (ShutdownSignal::Graceful, ShutdownSignal::Forced) => true,
                (ShutdownSignal::Graceful, _) => false,
                (ShutdownSignal::Running, next) => next != ShutdownSignal::Running,
            };
            if escalate {
                *current = signal;
            }
            escalate
        });
    }

    pub fn current(&self) -> ShutdownSignal {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownSignal> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Async TCP server for module servers.
///
/// Each accepted connection is served on its own task and may carry several
/// requests in sequence until the peer closes it.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Binds the listener.
    ///
    /// An address already held by another process is reported as `PortInUse`.
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => OrthosError::PortInUse(bind_addr.to_string()),
            _ => OrthosError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)),
        })?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| OrthosError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Serves requests until `shutdown` is signalled.
    ///
    /// `Shutdown` requests are acknowledged and then signal `shutdown`
    /// themselves; every other request goes to `handler`. Handler errors are
    /// answered with an error response on the same connection and never stop
    /// the server.
    pub async fn run_until<F, Fut>(self, handler: F, shutdown: ShutdownHandle) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut connections = JoinSet::new();
        let mut signals = shutdown.subscribe();

        let mut signal = loop {
            tokio::select! {
                changed = signals.wait_for(|s| *s != ShutdownSignal::Running) => {
                    break changed.map(|s| *s).unwrap_or(ShutdownSignal::Graceful);
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    tracing::debug!(%peer_addr, "connection established");

                    let handler = handler.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, handler, shutdown).await {
                            tracing::debug!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                // reap finished connections so the set does not grow unbounded
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        drop(self.listener);

        // a graceful drain may still be escalated to a forced stop
        if signal == ShutdownSignal::Graceful {
            tokio::select! {
                _ = async { while connections.join_next().await.is_some() {} } => {}
                _ = signals.wait_for(|s| *s == ShutdownSignal::Forced) => {
                    signal = ShutdownSignal::Forced;
                }
            }
        }

        match signal {
            ShutdownSignal::Forced => {
                tracing::info!(in_flight = connections.len(), "forced shutdown, aborting connections");
                connections.abort_all();
                while connections.join_next().await.is_some() {}
            }
            _ => {
                tracing::info!(in_flight = connections.len(), "graceful shutdown, draining connections");
                while connections.join_next().await.is_some() {}
            }
        }

        Ok(())
    }
}

/// Serves one connection until the peer closes it or shutdown is signalled
/// between requests.
async fn handle_connection<F, Fut>(
    mut stream: TcpStream,
    handler: Arc<F>,
    shutdown: ShutdownHandle,
) -> Result<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    let mut signals = shutdown.subscribe();
    loop {
        let frame = tokio::select! {
            _ = signals.wait_for(|s| *s != ShutdownSignal::Running) => return Ok(()),
            frame = TcpTransport::receive_message(&mut stream) => frame,
        };

        let buf = match frame {
            Ok(buf) => buf,
            // peer closed the connection
            Err(OrthosError::Connection(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let request = match JsonCodec::decode_request(&buf) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode request");
                send_response(&mut stream, &Response::error(0, &e)).await?;
                continue;
            }
        };

        if let RequestBody::Shutdown { force } = request.body {
            tracing::info!(force, "shutdown requested");
            send_response(&mut stream, &Response::ack(request.id)).await?;
            if force {
                shutdown.force();
            } else {
                shutdown.graceful();
            }
            return Ok(());
        }

        let request_id = request.id;
        let response = match handler(request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(request_id, error = %e, "handler error");
                Response::error(request_id, &e)
            }
        };

        send_response(&mut stream, &response).await?;
    }
}

async fn send_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let encoded = JsonCodec::encode_response(response)?;
    TcpTransport::send_message(stream, &encoded).await
}
