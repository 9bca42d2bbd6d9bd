//! The capability contract every correction module implements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use orthos_common::{Document, RunParameters, Result, Suggestion};

use crate::artifacts;
use crate::spec::ModuleSpec;

/// Metric name to value, produced by `test` and `tune`.
///
/// Poor scores are reported here, never raised as errors. An empty report
/// means the module had nothing to test or tune.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metrics: BTreeMap<String, f64>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.metrics {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={:.4}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// A unit of correction logic.
///
/// All operations are blocking; callers on an async runtime run them on the
/// blocking pool. Implementations keep their loaded model behind interior
/// mutability so one instance can be shared as `Arc<dyn Module>`.
pub trait Module: Send + Sync {
    fn spec(&self) -> &ModuleSpec;

    fn id(&self) -> &str {
        &self.spec().id
    }

    /// Whether `train` has anything to produce.
    fn trainable(&self) -> bool {
        !self.spec().sources.is_empty()
    }

    /// Deletes every model artifact this module owns and drops the loaded
    /// model. Absent artifacts are not an error.
    fn reset(&self) -> Result<()> {
        self.unload();
        artifacts::remove_models(self.spec())
    }

    /// Builds `models[i]` from `sources[i]`, overwriting prior artifacts.
    ///
    /// `parameters.extra` carries the `key=value` pairs given for the stage;
    /// the same holds for `test` and `tune`.
    fn train(&self, parameters: &RunParameters) -> Result<()>;

    fn test(&self, _parameters: &RunParameters) -> Result<Report> {
        Ok(Report::new())
    }

    fn tune(&self, _parameters: &RunParameters) -> Result<Report> {
        Ok(Report::new())
    }

    /// Loads the model artifacts, failing with `ModelMissing` if any is absent.
    fn load(&self) -> Result<()>;

    /// Drops the loaded model, if any.
    fn unload(&self) {}

    /// Produces suggestions for `document` without mutating it. Loads the
    /// model on first use.
    fn run(&self, document: &Document, parameters: &RunParameters) -> Result<Vec<Suggestion>>;

    /// Whether concurrent `run` calls on one instance are safe.
    fn reentrant(&self) -> bool {
        true
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("capability", &self.spec().capability)
            .finish()
    }
}

/// Lazily loaded, shareable model state.
pub struct ModelSlot<M> {
    inner: RwLock<Option<Arc<M>>>,
}

impl<M> ModelSlot<M> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Returns the loaded model, loading it with `load` if necessary.
    pub fn get_or_load(&self, load: impl FnOnce() -> Result<M>) -> Result<Arc<M>> {
        if let Some(model) = self.inner.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return Ok(model.clone());
        }

        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }
        let model = Arc::new(load()?);
        *slot = Some(model.clone());
        Ok(model)
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl<M> Default for ModelSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_model_slot_loads_once() {
        let loads = AtomicUsize::new(0);
        let slot: ModelSlot<u32> = ModelSlot::new();

        for _ in 0..3 {
            let model = slot
                .get_or_load(|| {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .unwrap();
            assert_eq!(*model, 42);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        slot.clear();
        assert!(!slot.is_loaded());
    }

    #[test]
    fn test_model_slot_does_not_cache_failures() {
        let slot: ModelSlot<u32> = ModelSlot::new();
        let err = slot.get_or_load(|| Err(orthos_common::OrthosError::Timeout(1)));
        assert!(err.is_err());
        assert!(!slot.is_loaded());
        assert_eq!(*slot.get_or_load(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_report_display_is_sorted() {
        let report = Report::new().with("recall", 0.5).with("accuracy", 1.0);
        assert_eq!(report.to_string(), "accuracy=1.0000, recall=0.5000");
    }
}
