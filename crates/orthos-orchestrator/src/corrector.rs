use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use orthos_common::{Document, OrthosError, Result, RunParameters};
use orthos_modules::{Module, ModuleFactory};

use crate::annotated::AnnotatedDocument;
use crate::config::CorrectorConfig;
use crate::dispatcher::Dispatcher;
use crate::evaluation::{self, EvaluationReport, Reference};
use crate::lifecycle::{self, LifecycleReport, Stage};
use crate::selector::{EndpointSelector, LoadProbe};
use crate::servers::{self, ServerOutcome, ServerRecord, ServerRegistry, ServerReport, ServerStatus, StartOptions};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Orthos Corrector - owns the module registry and runs every command.
///
/// Modules are kept in configuration order, which is also the order their
/// suggestions and report entries come out in. The registry is read-only
/// once built, so concurrent dispatches share it without locking.
///
/// # Example
///
/// ```no_run
/// use orthos_orchestrator::Corrector;
/// use orthos_common::{Document, RunParameters};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> orthos_common::Result<()> {
/// let corrector = Corrector::from_file(Path::new("corrector.json"))?;
/// corrector.train(&[], &RunParameters::default()).await?;
///
/// let doc = Document::from_text("letter", "I wa teh best.");
/// let annotated = corrector.run(doc, &[], &RunParameters::default()).await?;
/// println!("{}", serde_json::to_string_pretty(&annotated)?);
/// # Ok(())
/// # }
/// ```
pub struct Corrector {
    config: CorrectorConfig,
    modules: IndexMap<String, Arc<dyn Module>>,
    selector: EndpointSelector,
}

impl Corrector {
    /// Validates `config` in full, then builds every module through `factory`.
    pub fn new(config: CorrectorConfig, factory: &ModuleFactory) -> Result<Self> {
        config.validate(factory)?;

        let mut modules = IndexMap::new();
        for (id, spec) in config.module_specs()? {
            tracing::debug!(module = %id, capability = %spec.capability, mode = ?spec.mode, "building module");
            modules.insert(id, factory.create(spec)?);
        }

        tracing::info!(corrector = %config.id, modules = modules.len(), "corrector ready");
        let selector = EndpointSelector::with_client(config.probe_timeout());
        Ok(Self {
            config,
            modules,
            selector,
        })
    }

    /// Loads a configuration file and builds it with the built-in modules.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(CorrectorConfig::from_file(path)?, &ModuleFactory::builtin())
    }

    /// Replaces the source of load samples used for endpoint selection.
    pub fn with_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.selector = EndpointSelector::new(probe, self.config.probe_timeout());
        self
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.config.root()
    }

    pub fn module(&self, id: &str) -> Option<&Arc<dyn Module>> {
        self.modules.get(id)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// The modules named by `ids` in registration order, or all of them when
    /// `ids` is empty.
    ///
    /// # Errors
    ///
    /// `UnknownModule` for the first id that is not registered.
    pub fn select(&self, ids: &[String]) -> Result<Vec<Arc<dyn Module>>> {
        if let Some(unknown) = ids.iter().find(|id| !self.modules.contains_key(id.as_str())) {
            return Err(OrthosError::UnknownModule(unknown.clone()));
        }
        Ok(self
            .modules
            .iter()
            .filter(|(id, _)| ids.is_empty() || ids.contains(*id))
            .map(|(_, module)| module.clone())
            .collect())
    }

    pub async fn reset(&self, ids: &[String]) -> Result<LifecycleReport> {
        self.lifecycle(Stage::Reset, ids, &RunParameters::default()).await
    }

    pub async fn train(&self, ids: &[String], parameters: &RunParameters) -> Result<LifecycleReport> {
        self.lifecycle(Stage::Train, ids, parameters).await
    }

    pub async fn test(&self, ids: &[String], parameters: &RunParameters) -> Result<LifecycleReport> {
        self.lifecycle(Stage::Test, ids, parameters).await
    }

    pub async fn tune(&self, ids: &[String], parameters: &RunParameters) -> Result<LifecycleReport> {
        self.lifecycle(Stage::Tune, ids, parameters).await
    }

    async fn lifecycle(
        &self,
        stage: Stage,
        ids: &[String],
        parameters: &RunParameters,
    ) -> Result<LifecycleReport> {
        let modules = self.select(ids)?;
        Ok(lifecycle::run_stage(stage, &modules, &self.config.retry, parameters).await)
    }

    /// Runs the selected modules over `document`.
    ///
    /// # Errors
    ///
    /// `UnknownModule` for an unregistered id, `NoModuleSucceeded` if every
    /// module failed.
    pub async fn run(
        &self,
        document: Document,
        ids: &[String],
        parameters: &RunParameters,
    ) -> Result<AnnotatedDocument> {
        let modules = self.select(ids)?;
        self.dispatcher().dispatch(&modules, document, parameters).await
    }

    /// Runs the selected modules and scores the result against `reference`.
    pub async fn evaluate(
        &self,
        document: Document,
        reference: &Reference,
        ids: &[String],
        parameters: &RunParameters,
    ) -> Result<EvaluationReport> {
        let annotated = self.run(document, ids, parameters).await?;
        Ok(evaluation::evaluate(&annotated, reference))
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.selector.clone(),
            self.config.retry.clone(),
            self.config.threads,
            self.config.timeout(),
        )
    }

    /// Starts a server for every remote endpoint of the selected modules that
    /// lives on this host. A failed start does not stop the others.
    pub async fn start_servers(&self, ids: &[String], options: &StartOptions) -> Result<ServerReport> {
        let mut registry = ServerRegistry::open(self.root())?;
        let mut report = ServerReport::default();

        for module in self.select(ids)? {
            for endpoint in self.local_endpoints(module.as_ref(), options.host.as_deref()) {
                match servers::spawn_server(module.id(), &endpoint, options).await {
                    Ok(pid) => {
                        tracing::info!(module = %module.id(), %endpoint, pid, "server started");
                        registry.insert(ServerRecord {
                            module: module.id().to_string(),
                            endpoint: endpoint.clone(),
                            pid,
                        });
                        report.record(module.id(), &endpoint, ServerOutcome::Started { pid });
                    }
                    Err(e) => report.record_error(module.id(), &endpoint, &e),
                }
            }
        }

        registry.save()?;
        Ok(report)
    }

    /// Stops the selected modules' servers on this host: everything recorded
    /// in the registry plus configured local endpoints.
    pub async fn stop_servers(&self, ids: &[String], force: bool, host: Option<&str>) -> Result<ServerReport> {
        let mut registry = ServerRegistry::open(self.root())?;
        let mut report = ServerReport::default();

        for module in self.select(ids)? {
            let mut endpoints: Vec<_> = registry
                .records()
                .iter()
                .filter(|r| r.module == module.id())
                .map(|r| r.endpoint.clone())
                .collect();
            for endpoint in self.local_endpoints(module.as_ref(), host) {
                if !endpoints.contains(&endpoint) {
                    endpoints.push(endpoint);
                }
            }

            for endpoint in endpoints {
                match servers::stop_server(&endpoint, force, SHUTDOWN_TIMEOUT).await {
                    Ok(outcome) => {
                        tracing::info!(module = %module.id(), %endpoint, ?outcome, force, "server stop");
                        registry.remove(&endpoint);
                        report.record(module.id(), &endpoint, outcome);
                    }
                    Err(e) => report.record_error(module.id(), &endpoint, &e),
                }
            }
        }

        registry.save()?;
        Ok(report)
    }

    /// Probes every configured endpoint of every module.
    pub async fn list_servers(&self) -> Result<Vec<ServerStatus>> {
        let registry = ServerRegistry::open(self.root())?;
        let mut statuses = Vec::new();

        for module in self.modules.values() {
            let handles = self.selector.probe_all(module.spec().mode.endpoints()).await;
            statuses.extend(handles.into_iter().map(|handle| ServerStatus {
                module: module.id().to_string(),
                pid: registry.find(&handle.endpoint).map(|r| r.pid),
                handle,
            }));
        }
        Ok(statuses)
    }

    fn local_endpoints(&self, module: &dyn Module, host: Option<&str>) -> Vec<orthos_modules::Endpoint> {
        module
            .spec()
            .mode
            .endpoints()
            .iter()
            .filter(|e| servers::is_local_host(&e.host, host))
            .cloned()
            .collect()
    }
}
