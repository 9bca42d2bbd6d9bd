//! Dummy module for pipeline tests. It owns no models and never suggests
//! anything; `delay_ms` makes `run` slow and `fail` makes it fail.

use std::time::Duration;

use orthos_common::{Document, OrthosError, Result, RunParameters, Suggestion};

use crate::module::Module;
use crate::spec::ModuleSpec;

pub const CAPABILITY: &str = "dummy";

pub struct DummyModule {
    spec: ModuleSpec,
    delay: Duration,
    fail: bool,
    reentrant: bool,
}

impl DummyModule {
    pub fn new(spec: ModuleSpec) -> Result<Self> {
        let delay = Duration::from_millis(spec.options.u64(&spec.id, "delay_ms")?.unwrap_or(0));
        let fail = spec.options.bool(&spec.id, "fail")?.unwrap_or(false);
        let reentrant = spec.options.bool(&spec.id, "reentrant")?.unwrap_or(true);
        Ok(Self {
            spec,
            delay,
            fail,
            reentrant,
        })
    }
}

impl Module for DummyModule {
    fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    fn trainable(&self) -> bool {
        false
    }

    fn train(&self, _parameters: &RunParameters) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<()> {
        Ok(())
    }

    fn run(&self, _document: &Document, _parameters: &RunParameters) -> Result<Vec<Suggestion>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail {
            return Err(OrthosError::RunFailure {
                module: self.spec.id.clone(),
                message: "configured to fail".to_string(),
            });
        }
        Ok(Vec::new())
    }

    fn reentrant(&self) -> bool {
        self.reentrant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    #[test]
    fn test_dummy_delays_and_fails_on_request() {
        let spec = ModuleSpec::new("slow", CAPABILITY)
            .with_option("delay_ms", json!(50))
            .with_option("fail", json!(true));
        let module = DummyModule::new(spec).unwrap();
        let doc = Document::from_text("d", "anything");

        let start = Instant::now();
        let err = module.run(&doc, &RunParameters::default()).unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(matches!(err, OrthosError::RunFailure { .. }));
    }

    #[test]
    fn test_dummy_has_nothing_to_train() {
        let module = DummyModule::new(ModuleSpec::new("d", CAPABILITY)).unwrap();
        assert!(!module.trainable());
        assert!(module.reset().is_ok());
        assert!(module.test(&RunParameters::default()).unwrap().is_empty());
    }
}
