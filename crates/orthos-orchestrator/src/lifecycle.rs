//! Lifecycle pipeline: reset, train, test and tune across modules.
//!
//! Modules are processed one after another in registration order. Each
//! module's outcome is recorded separately; one failure never stops the
//! remaining modules.

use std::fmt;
use std::sync::Arc;

use orthos_common::{ErrorKind, OrthosError, Result, RunParameters};
use orthos_modules::{Module, Report};

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reset,
    Train,
    Test,
    Tune,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Reset => "reset",
            Stage::Train => "train",
            Stage::Test => "test",
            Stage::Tune => "tune",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(Report),
    Skipped(String),
    Failed { kind: ErrorKind, message: String },
}

impl Outcome {
    fn failed(error: &OrthosError) -> Self {
        Outcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutcome {
    pub module: String,
    pub outcome: Outcome,
}

/// Per-module breakdown of one lifecycle stage.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleReport {
    pub stage: Stage,
    pub entries: Vec<ModuleOutcome>,
}

impl LifecycleReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, module: impl Into<String>, outcome: Outcome) {
        self.entries.push(ModuleOutcome {
            module: module.into(),
            outcome,
        });
    }

    /// True when no module failed. Skipped modules do not count as failures.
    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed { .. }))
            .map(|e| e.module.as_str())
            .collect()
    }

    pub fn outcome(&self, module: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.module == module)
            .map(|e| &e.outcome)
    }
}

impl fmt::Display for LifecycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed().len();
        writeln!(
            f,
            "{}: {} module(s), {} failed",
            self.stage,
            self.entries.len(),
            failed
        )?;
        for entry in &self.entries {
            match &entry.outcome {
                Outcome::Succeeded(report) if report.is_empty() => {
                    writeln!(f, "  {:<16} ok", entry.module)?
                }
                Outcome::Succeeded(report) => writeln!(f, "  {:<16} ok  {}", entry.module, report)?,
                Outcome::Skipped(reason) => writeln!(f, "  {:<16} skipped ({})", entry.module, reason)?,
                Outcome::Failed { kind, message } => {
                    writeln!(f, "  {:<16} FAILED [{}] {}", entry.module, kind, message)?
                }
            }
        }
        Ok(())
    }
}

/// Runs `stage` on every module in order. `parameters` are handed to each
/// module's train, test or tune.
pub async fn run_stage(
    stage: Stage,
    modules: &[Arc<dyn Module>],
    retry: &RetryConfig,
    parameters: &RunParameters,
) -> LifecycleReport {
    let mut report = LifecycleReport::new(stage);

    for module in modules {
        let id = module.id().to_string();
        tracing::info!(module = %id, "{} started", stage);

        let outcome = match stage {
            Stage::Reset => match blocking(module, |m| m.reset()).await {
                Ok(()) => Outcome::Succeeded(Report::new()),
                Err(e) => Outcome::failed(&e),
            },
            Stage::Train if !module.trainable() => Outcome::Skipped("no trainable artifacts".to_string()),
            Stage::Train => match train_with_retry(module, retry, parameters).await {
                Ok(()) => Outcome::Succeeded(Report::new()),
                Err(e) => Outcome::failed(&e),
            },
            Stage::Test | Stage::Tune => {
                let parameters = parameters.clone();
                let result = if stage == Stage::Test {
                    blocking(module, move |m| m.test(&parameters)).await
                } else {
                    blocking(module, move |m| m.tune(&parameters)).await
                };
                match result {
                    Ok(metrics) if metrics.is_empty() => Outcome::Skipped(format!("nothing to {}", stage)),
                    Ok(metrics) => Outcome::Succeeded(metrics),
                    Err(e) => Outcome::failed(&e),
                }
            }
        };

        match &outcome {
            Outcome::Failed { message, .. } => tracing::error!(module = %id, "{} failed: {}", stage, message),
            Outcome::Skipped(reason) => tracing::info!(module = %id, "{} skipped: {}", stage, reason),
            Outcome::Succeeded(_) => tracing::info!(module = %id, "{} finished", stage),
        }
        report.record(id, outcome);
    }

    report
}

/// `TrainingFailure` is retried; a missing source never is.
async fn train_with_retry(
    module: &Arc<dyn Module>,
    retry: &RetryConfig,
    parameters: &RunParameters,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        let parameters = parameters.clone();
        match blocking(module, move |m| m.train(&parameters)).await {
            Err(e @ OrthosError::TrainingFailure { .. }) if attempt < retry.max_retries => {
                let backoff = retry.backoff(attempt);
                tracing::warn!(
                    module = %module.id(),
                    attempt = attempt + 1,
                    error = %e,
                    "training failed, retrying in {}ms",
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn blocking<T, F>(module: &Arc<dyn Module>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Module) -> Result<T> + Send + 'static,
{
    let module = module.clone();
    let id = module.id().to_string();
    tokio::task::spawn_blocking(move || op(module.as_ref()))
        .await
        .map_err(|e| OrthosError::Transport(format!("module '{}' task failed: {}", id, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use orthos_common::{Document, RunParameters, Suggestion};
    use orthos_modules::{ModuleFactory, ModuleSpec};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails training a fixed number of times before succeeding.
    struct Flaky {
        spec: ModuleSpec,
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl Module for Flaky {
        fn spec(&self) -> &ModuleSpec {
            &self.spec
        }

        fn train(&self, _parameters: &RunParameters) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(OrthosError::TrainingFailure {
                    module: self.spec.id.clone(),
                    message: "backend busy".into(),
                });
            }
            Ok(())
        }

        fn load(&self) -> Result<()> {
            Ok(())
        }

        fn run(&self, _document: &Document, _parameters: &RunParameters) -> Result<Vec<Suggestion>> {
            Ok(Vec::new())
        }
    }

    fn flaky(failures: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            spec: ModuleSpec::new("flaky", "flaky").with_source("in.txt", "out.model"),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        })
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    fn defaults() -> RunParameters {
        RunParameters::default()
    }

    fn errorlist(dir: &Path, id: &str, write_source: bool) -> Arc<dyn Module> {
        let source = dir.join(format!("{}.tsv", id));
        if write_source {
            std::fs::write(&source, "teh\tthe\n").unwrap();
        }
        let spec = ModuleSpec::new(id, "errorlist").with_source(source, dir.join(format!("{}.model", id)));
        ModuleFactory::builtin().create(spec).unwrap()
    }

    #[tokio::test]
    async fn test_training_failure_is_retried() {
        let module = flaky(2);
        let modules = [module.clone() as Arc<dyn Module>];
        let report = run_stage(Stage::Train, &modules, &quick_retry(), &defaults()).await;
        assert!(report.is_success());
        assert_eq!(module.attempts.load(Ordering::SeqCst), 3);

        let module = flaky(5);
        let modules = [module.clone() as Arc<dyn Module>];
        let report = run_stage(Stage::Train, &modules, &quick_retry(), &defaults()).await;
        assert_eq!(report.failed(), vec!["flaky"]);
        assert_eq!(module.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_retried_and_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let modules = vec![
            errorlist(dir.path(), "missing", false),
            errorlist(dir.path(), "present", true),
            ModuleFactory::builtin().create(ModuleSpec::new("noop", "dummy")).unwrap(),
        ];

        let report = run_stage(Stage::Train, &modules, &quick_retry(), &defaults()).await;
        assert!(!report.is_success());
        assert!(matches!(
            report.outcome("missing"),
            Some(Outcome::Failed { kind: ErrorKind::MissingSource, .. })
        ));
        assert!(matches!(report.outcome("present"), Some(Outcome::Succeeded(_))));
        assert!(matches!(report.outcome("noop"), Some(Outcome::Skipped(_))));
    }

    #[tokio::test]
    async fn test_reset_then_test_reports_model_missing() {
        let dir = tempfile::tempdir().unwrap();
        let modules = vec![errorlist(dir.path(), "el", true)];

        assert!(run_stage(Stage::Train, &modules, &RetryConfig::none(), &defaults()).await.is_success());
        let report = run_stage(Stage::Test, &modules, &RetryConfig::none(), &defaults()).await;
        match report.outcome("el") {
            Some(Outcome::Succeeded(metrics)) => assert_eq!(metrics.get("entries"), Some(1.0)),
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(run_stage(Stage::Reset, &modules, &RetryConfig::none(), &defaults()).await.is_success());
        // a second reset finds nothing to delete
        assert!(run_stage(Stage::Reset, &modules, &RetryConfig::none(), &defaults()).await.is_success());

        let report = run_stage(Stage::Test, &modules, &RetryConfig::none(), &defaults()).await;
        assert!(matches!(
            report.outcome("el"),
            Some(Outcome::Failed { kind: ErrorKind::ModelMissing, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_tune_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let modules = vec![errorlist(dir.path(), "el", true)];
        run_stage(Stage::Train, &modules, &RetryConfig::none(), &defaults()).await;

        let report = run_stage(Stage::Tune, &modules, &RetryConfig::none(), &defaults()).await;
        assert!(report.is_success());
        assert_eq!(report.outcome("el"), Some(&Outcome::Skipped("nothing to tune".into())));
    }

    #[test]
    fn test_display_breakdown() {
        let mut report = LifecycleReport::new(Stage::Test);
        report.record("errorlist", Outcome::Succeeded(Report::new().with("entries", 3.0)));
        report.record("noop", Outcome::Skipped("nothing to test".into()));
        report.record(
            "confusible",
            Outcome::Failed {
                kind: ErrorKind::ModelMissing,
                message: "model missing".into(),
            },
        );

        let text = report.to_string();
        assert!(text.starts_with("test: 3 module(s), 1 failed"));
        assert!(text.contains("entries=3.0000"));
        assert!(text.contains("skipped (nothing to test)"));
        assert!(text.contains("FAILED [ModelMissing] model missing"));
    }
}
