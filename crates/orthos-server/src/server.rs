use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use orthos_common::protocol::error::{OrthosError, Result};
use orthos_common::protocol::{Document, Request, RequestBody, Response, RunParameters, ServerInfo};
use orthos_common::transport::{ShutdownHandle, TcpServer};
use orthos_modules::Module;

use crate::limits::ServerLimits;
use crate::stats::ServerStats;

/// Orthos module server - serves exactly one module over TCP.
///
/// Each run request executes the module on the blocking pool. Reentrant
/// modules run concurrently; non-reentrant ones are serialized through a
/// mutex, and requests queued on it count towards the reported load.
///
/// # Example
///
/// ```no_run
/// use orthos_modules::{ModuleFactory, ModuleSpec};
/// use orthos_server::{ModuleServer, ServerLimits};
///
/// # #[tokio::main]
/// # async fn main() -> orthos_common::Result<()> {
/// let spec = ModuleSpec::new("errorlist", "errorlist").with_model("/data/errors.model");
/// let module = ModuleFactory::builtin().create(spec)?;
/// let server = ModuleServer::bind(module, ServerLimits::default(), "0.0.0.0:12346").await?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct ModuleServer {
    listener: TcpServer,
    handler: Arc<RequestHandler>,
    shutdown: ShutdownHandle,
}

impl ModuleServer {
    /// Loads the module's models and binds the listener.
    ///
    /// # Errors
    ///
    /// - `ModelMissing` if a model artifact does not exist
    /// - `PortInUse` if `bind_addr` is already bound
    /// - `ConfigInvalid` if `limits` are invalid
    pub async fn bind(module: Arc<dyn Module>, limits: ServerLimits, bind_addr: &str) -> Result<Self> {
        limits.validate().map_err(OrthosError::ConfigInvalid)?;

        let loader = module.clone();
        tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| OrthosError::Transport(format!("model loading task failed: {}", e)))??;
        tracing::info!(module = %module.id(), "models loaded");

        let listener = TcpServer::bind(bind_addr).await?;

        let gate = (!module.reentrant()).then(|| Arc::new(Mutex::new(())));
        Ok(Self {
            listener,
            handler: Arc::new(RequestHandler {
                module,
                limits,
                stats: Arc::new(ServerStats::new()),
                gate,
            }),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for stopping the server from the hosting process.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.handler.stats.clone()
    }

    /// Serves until a graceful or forced shutdown completes.
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(module = %self.handler.module.id(), %addr, "module server listening");

        let handler = self.handler.clone();
        self.listener
            .run_until(
                move |request| {
                    let handler = handler.clone();
                    async move { handler.handle(request).await }
                },
                self.shutdown,
            )
            .await?;

        tracing::info!(module = %self.handler.module.id(), "module server stopped");
        Ok(())
    }
}

struct RequestHandler {
    module: Arc<dyn Module>,
    limits: ServerLimits,
    stats: Arc<ServerStats>,
    /// Present when the module is not reentrant
    gate: Option<Arc<Mutex<()>>>,
}

impl RequestHandler {
    async fn handle(&self, request: Request) -> Result<Response> {
        match request.body {
            RequestBody::Run {
                module,
                document,
                parameters,
            } => {
                if module != self.module.id() {
                    return Err(OrthosError::InvalidRequest(format!(
                        "this server runs module '{}', not '{}'",
                        self.module.id(),
                        module
                    )));
                }

                let start = Instant::now();
                let result = self.run(document, parameters, request.timeout_ms).await;
                self.stats.record_call(start, result.is_ok());

                match &result {
                    Ok(suggestions) => tracing::debug!(
                        module = %module,
                        suggestions = suggestions.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "run completed"
                    ),
                    Err(e) => tracing::warn!(module = %module, error = %e, "run failed"),
                }
                Ok(Response::suggestions(request.id, result?))
            }
            RequestBody::Load => Ok(Response::load(request.id, self.stats.load_sample())),
            RequestBody::Info => Ok(Response::info(request.id, self.info())),
            // acknowledged by the transport before it reaches the handler
            RequestBody::Shutdown { .. } => Ok(Response::ack(request.id)),
        }
    }

    async fn run(
        &self,
        document: Document,
        parameters: RunParameters,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<orthos_common::Suggestion>> {
        let timeout = self.limits.effective_timeout(timeout_ms);

        let work = async {
            let permit = match &self.gate {
                Some(gate) => {
                    let _waiting = self.stats.track_waiting();
                    Some(gate.clone().lock_owned().await)
                }
                None => None,
            };

            let module = self.module.clone();
            let in_flight = self.stats.track_in_flight();
            tokio::task::spawn_blocking(move || {
                // both are held until the module returns, even if the caller
                // has already given up
                let _permit = permit;
                let _in_flight = in_flight;
                module.run(&document, &parameters)
            })
            .await
            .map_err(|e| OrthosError::RunFailure {
                module: self.module.id().to_string(),
                message: format!("run task failed: {}", e),
            })?
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| OrthosError::Timeout(timeout.as_millis() as u64))?
    }

    fn info(&self) -> ServerInfo {
        let spec = self.module.spec();
        ServerInfo {
            module: spec.id.clone(),
            capability: spec.capability.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms: self.stats.uptime_ms(),
            total_requests: self.stats.total_requests(),
            failed_requests: self.stats.failed_requests(),
            mean_latency_ms: self.stats.mean_latency_ms(),
        }
    }
}
