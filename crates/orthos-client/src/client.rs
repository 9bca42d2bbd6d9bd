use std::time::Duration;

use orthos_common::protocol::error::{OrthosError, Result};
use orthos_common::protocol::{
    Document, LoadSample, Request, Response, ResponseBody, RunParameters, ServerInfo, Suggestion,
};
use orthos_common::transport::TcpTransport;

/// Client for one module server endpoint.
///
/// Creates a fresh TCP connection for each request, so one client can be
/// shared by any number of concurrent dispatches without serializing them.
#[derive(Debug, Clone)]
pub struct ModuleClient {
    endpoint: String,
    transport: TcpTransport,
}

impl ModuleClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: TcpTransport::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs `module` on the server over `document`.
    ///
    /// The whole exchange, connect included, is bounded by `timeout`; the
    /// timeout is also sent along so the server can give up on its side.
    pub async fn run(
        &self,
        module: &str,
        document: &Document,
        parameters: &RunParameters,
        timeout: Duration,
    ) -> Result<Vec<Suggestion>> {
        let request = Request::run(module, document.clone(), parameters.clone())
            .with_timeout(timeout.as_millis() as u64);

        match self.call(module, request, timeout).await?.body {
            ResponseBody::Suggestions { suggestions } => Ok(suggestions),
            other => Err(unexpected("suggestions", &other)),
        }
    }

    /// Samples the server's current load.
    pub async fn load(&self, timeout: Duration) -> Result<LoadSample> {
        match self.call(&self.endpoint, Request::load(), timeout).await?.body {
            ResponseBody::Load { sample } => Ok(sample),
            other => Err(unexpected("load", &other)),
        }
    }

    pub async fn info(&self, timeout: Duration) -> Result<ServerInfo> {
        match self.call(&self.endpoint, Request::info(), timeout).await?.body {
            ResponseBody::Info { info } => Ok(info),
            other => Err(unexpected("info", &other)),
        }
    }

    /// Asks the server to stop. With `force` it aborts in-flight requests
    /// instead of draining them.
    pub async fn shutdown(&self, force: bool, timeout: Duration) -> Result<()> {
        match self.call(&self.endpoint, Request::shutdown(force), timeout).await?.body {
            ResponseBody::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    /// Sends one request on a fresh connection and turns error responses
    /// back into typed errors attributed to `subject`.
    async fn call(&self, subject: &str, request: Request, timeout: Duration) -> Result<Response> {
        let exchange = async {
            let mut stream = self.transport.connect(&self.endpoint).await?;
            self.transport.send_request(&mut stream, &request).await
            // connection is closed here when stream is dropped
        };

        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| OrthosError::Timeout(timeout.as_millis() as u64))??;

        match response.body {
            ResponseBody::Error { kind, message } => {
                Err(OrthosError::from_wire(subject, kind, message))
            }
            _ => Ok(response),
        }
    }
}

fn unexpected(expected: &str, got: &ResponseBody) -> OrthosError {
    OrthosError::InvalidResponse(format!("expected {} response, got {:?}", expected, got))
}
