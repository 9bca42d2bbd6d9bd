//! Concurrent module dispatch.
//!
//! Every selected module is invoked independently: in-process on the
//! blocking pool, or on the least loaded of its servers. At most `threads`
//! invocations run at once. Each invocation, retries included, is bounded by
//! the module's timeout, and its failure only removes that module's
//! contribution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use orthos_client::ModuleClient;
use orthos_common::{Document, OrthosError, Result, RunParameters, Suggestion};
use orthos_modules::Module;

use crate::annotated::AnnotatedDocument;
use crate::config::RetryConfig;
use crate::selector::EndpointSelector;

pub struct Dispatcher {
    selector: EndpointSelector,
    retry: RetryConfig,
    threads: usize,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        selector: EndpointSelector,
        retry: RetryConfig,
        threads: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            selector,
            retry,
            threads: threads.max(1),
            default_timeout,
        }
    }

    /// Runs `modules` over `document` and merges their suggestions in the
    /// order the modules are given.
    ///
    /// # Errors
    ///
    /// `NoModuleSucceeded` if every module failed or timed out. Individual
    /// failures are recorded in the returned document otherwise.
    pub async fn dispatch(
        &self,
        modules: &[Arc<dyn Module>],
        document: Document,
        parameters: &RunParameters,
    ) -> Result<AnnotatedDocument> {
        let threads = parameters.threads.unwrap_or(self.threads).max(1);
        let permits = Semaphore::new(threads);
        let shared = Arc::new(document);

        tracing::info!(
            document = %shared.id,
            modules = modules.len(),
            threads,
            "dispatching run"
        );

        let invocations = modules.iter().map(|module| {
            let permits = &permits;
            let document = shared.clone();
            async move {
                let _permit = permits
                    .acquire()
                    .await
                    .map_err(|e| OrthosError::Transport(format!("dispatch pool closed: {}", e)))?;

                let timeout = self.timeout_for(module.as_ref(), parameters);
                let start = Instant::now();
                let result = tokio::time::timeout(timeout, self.invoke(module, document, parameters))
                    .await
                    .unwrap_or_else(|_| Err(OrthosError::Timeout(timeout.as_millis() as u64)));

                match &result {
                    Ok(suggestions) => tracing::info!(
                        module = %module.id(),
                        suggestions = suggestions.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "module finished"
                    ),
                    Err(e) => tracing::warn!(
                        module = %module.id(),
                        error = %e,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "module failed"
                    ),
                }
                result
            }
        });

        let results = futures::future::join_all(invocations).await;

        // abandoned local runs may still hold a reference
        let document = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
        let mut annotated = AnnotatedDocument::new(document);
        for (module, result) in modules.iter().zip(results) {
            match result {
                Ok(suggestions) => annotated.annotate(module.id(), suggestions),
                Err(e) => annotated.fail(module.id(), &e),
            }
        }

        if annotated.annotations.is_empty() {
            return Err(OrthosError::NoModuleSucceeded);
        }
        Ok(annotated)
    }

    /// Run override first, then the module's own timeout, then the default.
    fn timeout_for(&self, module: &dyn Module, parameters: &RunParameters) -> Duration {
        parameters
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .or(module.spec().timeout)
            .unwrap_or(self.default_timeout)
    }

    async fn invoke(
        &self,
        module: &Arc<dyn Module>,
        document: Arc<Document>,
        parameters: &RunParameters,
    ) -> Result<Vec<Suggestion>> {
        let spec = module.spec();
        if parameters.force_local || !spec.mode.is_remote() {
            return run_local(module.clone(), document, parameters.clone()).await;
        }

        let endpoints = spec.mode.endpoints();
        let timeout = self.timeout_for(module.as_ref(), parameters);
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            let result = match self.selector.select(module.id(), endpoints).await {
                Ok(server) => {
                    // a zero timeout on the wire means no limit to the server
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.as_millis() == 0 {
                        return Err(OrthosError::Timeout(timeout.as_millis() as u64));
                    }
                    ModuleClient::new(server.endpoint.address())
                        .run(module.id(), &document, parameters, remaining)
                        .await
                }
                Err(OrthosError::NoAvailableServer(_)) if spec.fallback_local => {
                    tracing::warn!(module = %module.id(), "no server reachable, running locally");
                    return run_local(module.clone(), document, parameters.clone()).await;
                }
                Err(e) => Err(e),
            };

            match result {
                Err(e) if attempt < self.retry.max_retries && is_retryable(&e) => {
                    let backoff = self.retry.backoff(attempt);
                    if Instant::now() + backoff >= deadline {
                        tracing::warn!(module = %module.id(), error = %e, "no time left for another attempt");
                        return Err(e);
                    }
                    tracing::warn!(
                        module = %module.id(),
                        attempt = attempt + 1,
                        error = %e,
                        "remote run failed, retrying in {}ms",
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Failures worth another selection round.
pub fn is_retryable(error: &OrthosError) -> bool {
    matches!(
        error,
        OrthosError::Unreachable { .. } | OrthosError::Connection(_) | OrthosError::NoAvailableServer(_)
    )
}

async fn run_local(
    module: Arc<dyn Module>,
    document: Arc<Document>,
    parameters: RunParameters,
) -> Result<Vec<Suggestion>> {
    let id = module.id().to_string();
    tokio::task::spawn_blocking(move || module.run(&document, &parameters))
        .await
        .map_err(|e| OrthosError::RunFailure {
            module: id,
            message: format!("run task failed: {}", e),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::LoadProbe;
    use async_trait::async_trait;
    use orthos_common::{ErrorKind, LoadSample, Replacement};
    use orthos_modules::{Endpoint, ModuleFactory, ModuleSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Flags every occurrence of one word.
    struct WordModule {
        spec: ModuleSpec,
        word: &'static str,
    }

    impl Module for WordModule {
        fn spec(&self) -> &ModuleSpec {
            &self.spec
        }

        fn train(&self, _parameters: &RunParameters) -> Result<()> {
            Ok(())
        }

        fn load(&self) -> Result<()> {
            Ok(())
        }

        fn run(&self, document: &Document, _parameters: &RunParameters) -> Result<Vec<Suggestion>> {
            Ok(document
                .tokens
                .iter()
                .filter(|t| t.text == self.word)
                .map(|t| Suggestion::for_token(t, vec![Replacement::new(self.word.to_uppercase())]))
                .collect())
        }
    }

    fn word(id: &str, word: &'static str) -> Arc<dyn Module> {
        Arc::new(WordModule {
            spec: ModuleSpec::new(id, "word"),
            word,
        })
    }

    fn dummy(id: &str, options: serde_json::Value) -> Arc<dyn Module> {
        let mut spec = ModuleSpec::new(id, "dummy");
        if let serde_json::Value::Object(map) = options {
            for (k, v) in map {
                spec = spec.with_option(k, v);
            }
        }
        ModuleFactory::builtin().create(spec).unwrap()
    }

    /// Counts probes; every endpoint refuses.
    #[derive(Default)]
    struct DownProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LoadProbe for DownProbe {
        async fn load(&self, endpoint: &Endpoint, _timeout: Duration) -> Result<LoadSample> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OrthosError::Unreachable {
                endpoint: endpoint.to_string(),
                message: "connection refused".into(),
            })
        }
    }

    fn dispatcher(probe: Arc<dyn LoadProbe>, retry: RetryConfig, threads: usize) -> Dispatcher {
        Dispatcher::new(
            EndpointSelector::new(probe, Duration::from_millis(100)),
            retry,
            threads,
            Duration::from_secs(5),
        )
    }

    fn remote(id: &str, fallback: bool) -> Arc<dyn Module> {
        let spec = ModuleSpec::new(id, "dummy")
            .with_endpoints(vec![Endpoint::new("localhost", 1)])
            .with_fallback_local(fallback);
        ModuleFactory::builtin().create(spec).unwrap()
    }

    #[tokio::test]
    async fn test_merge_follows_registration_order() {
        // the first module finishes last
        let modules = vec![
            dummy("delay", json!({ "delay_ms": 200 })),
            word("teh", "teh"),
            word("wa", "wa"),
        ];

        let d = dispatcher(Arc::new(DownProbe::default()), RetryConfig::none(), 4);
        let doc = Document::from_text("d", "I wa teh best.");
        let annotated = d.dispatch(&modules, doc, &RunParameters::default()).await.unwrap();

        assert_eq!(annotated.succeeded(), vec!["delay", "teh", "wa"]);
        assert_eq!(annotated.suggestions_of("teh").unwrap()[0].original, "teh");
        assert_eq!(annotated.suggestions_of("wa").unwrap()[0].original, "wa");
        assert!(!annotated.partial);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let modules = vec![word("ok", "teh"), dummy("broken", json!({ "fail": true }))];
        let d = dispatcher(Arc::new(DownProbe::default()), RetryConfig::none(), 2);

        let annotated = d
            .dispatch(&modules, Document::from_text("d", "teh"), &RunParameters::default())
            .await
            .unwrap();
        assert_eq!(annotated.succeeded(), vec!["ok"]);
        assert_eq!(annotated.failed(), vec!["broken"]);
        assert_eq!(annotated.failures[0].kind, ErrorKind::RunFailure);
        assert!(annotated.partial);
    }

    #[tokio::test]
    async fn test_timeout_does_not_hold_back_siblings() {
        let modules = vec![dummy("slow", json!({ "delay_ms": 2000 })), word("fast", "teh")];
        let d = dispatcher(Arc::new(DownProbe::default()), RetryConfig::none(), 2);
        let params = RunParameters {
            timeout_ms: Some(200),
            ..RunParameters::default()
        };

        let start = Instant::now();
        let annotated = d
            .dispatch(&modules, Document::from_text("d", "teh"), &params)
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert_eq!(annotated.failed(), vec!["slow"]);
        assert_eq!(annotated.failures[0].kind, ErrorKind::Timeout);
        assert_eq!(annotated.succeeded(), vec!["fast"]);
    }

    #[tokio::test]
    async fn test_module_timeout_overrides_default() {
        let spec = ModuleSpec::new("slow", "dummy")
            .with_option("delay_ms", json!(1000))
            .with_timeout(Duration::from_millis(100));
        let slow = ModuleFactory::builtin().create(spec).unwrap();
        let d = dispatcher(Arc::new(DownProbe::default()), RetryConfig::none(), 1);

        let err = d
            .dispatch(&[slow], Document::from_text("d", "x"), &RunParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrthosError::NoModuleSucceeded));
    }

    #[tokio::test]
    async fn test_thread_budget_bounds_parallelism() {
        let modules: Vec<_> = (0..3)
            .map(|i| dummy(&format!("m{}", i), json!({ "delay_ms": 150 })))
            .collect();
        let d = dispatcher(Arc::new(DownProbe::default()), RetryConfig::none(), 1);

        let start = Instant::now();
        d.dispatch(&modules, Document::from_text("d", "x"), &RunParameters::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(450));

        let params = RunParameters {
            threads: Some(3),
            ..RunParameters::default()
        };
        let start = Instant::now();
        d.dispatch(&modules, Document::from_text("d", "x"), &params)
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_no_server_retries_then_fails() {
        let probe = Arc::new(DownProbe::default());
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 20,
            backoff_multiplier: 2.0,
        };
        let d = dispatcher(probe.clone(), retry, 2);
        let modules = vec![word("local", "teh"), remote("remote", false)];

        let annotated = d
            .dispatch(&modules, Document::from_text("d", "teh"), &RunParameters::default())
            .await
            .unwrap();
        assert_eq!(annotated.failed(), vec!["remote"]);
        assert_eq!(annotated.failures[0].kind, ErrorKind::NoAvailableServer);
        // one selection round per attempt
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    /// Reports every endpoint as idle.
    struct UpProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LoadProbe for UpProbe {
        async fn load(&self, _endpoint: &Endpoint, _timeout: Duration) -> Result<LoadSample> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LoadSample::new(0, 0))
        }
    }

    #[tokio::test]
    async fn test_no_retry_past_the_deadline() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = Arc::new(UpProbe {
            calls: AtomicUsize::new(0),
        });
        let retry = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
        };
        let d = dispatcher(probe.clone(), retry, 1);
        let spec = ModuleSpec::new("remote", "dummy")
            .with_endpoints(vec![Endpoint::new("127.0.0.1", port)])
            .with_timeout(Duration::from_millis(200));
        let module = ModuleFactory::builtin().create(spec).unwrap();
        let modules = vec![module, word("local", "x")];

        let start = Instant::now();
        let annotated = d
            .dispatch(&modules, Document::from_text("d", "x"), &RunParameters::default())
            .await
            .unwrap();
        // the refused connection is reported instead of waiting out the backoff
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(annotated.failed(), vec!["remote"]);
        assert_eq!(annotated.failures[0].kind, ErrorKind::Unreachable);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_local_only_when_configured() {
        let probe = Arc::new(DownProbe::default());
        let d = dispatcher(probe, RetryConfig::none(), 2);
        let modules = vec![remote("with_fallback", true), remote("without", false)];

        let annotated = d
            .dispatch(&modules, Document::from_text("d", "x"), &RunParameters::default())
            .await
            .unwrap();
        assert_eq!(annotated.succeeded(), vec!["with_fallback"]);
        assert_eq!(annotated.failed(), vec!["without"]);
    }

    #[tokio::test]
    async fn test_force_local_skips_selection() {
        let probe = Arc::new(DownProbe::default());
        let d = dispatcher(probe.clone(), RetryConfig::none(), 1);
        let params = RunParameters {
            force_local: true,
            ..RunParameters::default()
        };

        let annotated = d
            .dispatch(&[remote("r", false)], Document::from_text("d", "x"), &params)
            .await
            .unwrap();
        assert_eq!(annotated.succeeded(), vec!["r"]);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable(&OrthosError::NoAvailableServer("m".into())));
        assert!(is_retryable(&OrthosError::Connection("reset".into())));
        assert!(!is_retryable(&OrthosError::Timeout(100)));
        assert!(!is_retryable(&OrthosError::RunFailure {
            module: "m".into(),
            message: "boom".into()
        }));
    }
}
