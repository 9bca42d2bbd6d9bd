//! Endpoint selection.
//!
//! Every selection probes all configured endpoints concurrently with a short
//! timeout and picks the least loaded reachable one. Ties go to the endpoint
//! listed first. Nothing is cached between selections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use orthos_client::ModuleClient;
use orthos_common::{LoadSample, OrthosError, Result};
use orthos_modules::Endpoint;

use crate::server_handle::ServerHandle;

/// Source of fresh load samples.
#[async_trait]
pub trait LoadProbe: Send + Sync {
    async fn load(&self, endpoint: &Endpoint, timeout: Duration) -> Result<LoadSample>;
}

/// Queries real module servers over the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientProbe;

#[async_trait]
impl LoadProbe for ClientProbe {
    async fn load(&self, endpoint: &Endpoint, timeout: Duration) -> Result<LoadSample> {
        ModuleClient::new(endpoint.address()).load(timeout).await
    }
}

/// Index of the least loaded reachable handle, the earliest one on ties.
///
/// A NaN load ranks after every number, so a server reporting one is only
/// picked when nothing else is reachable.
pub fn pick_least_loaded(handles: &[ServerHandle]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, load) in handles
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.load_value().map(|load| (i, rank(load))))
    {
        match best {
            Some((_, lowest)) if lowest.total_cmp(&load).is_le() => {}
            _ => best = Some((index, load)),
        }
    }
    best.map(|(index, _)| index)
}

fn rank(load: f64) -> f64 {
    if load.is_nan() {
        f64::INFINITY
    } else {
        load
    }
}

#[derive(Clone)]
pub struct EndpointSelector {
    probe: Arc<dyn LoadProbe>,
    probe_timeout: Duration,
}

impl EndpointSelector {
    pub fn new(probe: Arc<dyn LoadProbe>, probe_timeout: Duration) -> Self {
        Self { probe, probe_timeout }
    }

    /// Selector backed by [`ClientProbe`].
    pub fn with_client(probe_timeout: Duration) -> Self {
        Self::new(Arc::new(ClientProbe), probe_timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probes every endpoint at once. The result is in endpoint order.
    pub async fn probe_all(&self, endpoints: &[Endpoint]) -> Vec<ServerHandle> {
        let probes = endpoints.iter().map(|endpoint| async move {
            let sample = tokio::time::timeout(self.probe_timeout, self.probe.load(endpoint, self.probe_timeout))
                .await
                .unwrap_or_else(|_| Err(OrthosError::Timeout(self.probe_timeout.as_millis() as u64)));

            match sample {
                Ok(sample) => ServerHandle::reachable(endpoint.clone(), sample),
                Err(e) => {
                    tracing::debug!(%endpoint, error = %e, "load probe failed");
                    ServerHandle::unreachable(endpoint.clone(), e.to_string())
                }
            }
        });

        futures::future::join_all(probes).await
    }

    /// Picks the server `module` should run on for this call.
    ///
    /// # Errors
    ///
    /// `NoAvailableServer` if no endpoint answered its load query in time.
    pub async fn select(&self, module: &str, endpoints: &[Endpoint]) -> Result<ServerHandle> {
        let mut handles = self.probe_all(endpoints).await;

        match pick_least_loaded(&handles) {
            Some(index) => {
                let handle = handles.swap_remove(index);
                tracing::debug!(module, server = %handle, "selected server");
                Ok(handle)
            }
            None => {
                tracing::warn!(module, endpoints = endpoints.len(), "no server reachable");
                Err(OrthosError::NoAvailableServer(module.to_string()))
            }
        }
    }
}
