//! Capability registry
//!
//! Maps the capability tag named in a module declaration (e.g. `errorlist`)
//! to the constructor that builds the module. Tags are resolved once, when
//! the configuration is loaded.

use std::collections::BTreeMap;
use std::sync::Arc;

use orthos_common::{OrthosError, Result};

use crate::module::Module;
use crate::spec::ModuleSpec;
use crate::{confusible, dummy, errorlist, lexicon};

/// Builds a module from its declaration, validating module-specific options.
pub type ModuleConstructor = Arc<dyn Fn(ModuleSpec) -> Result<Arc<dyn Module>> + Send + Sync>;

#[derive(Clone)]
pub struct ModuleFactory {
    constructors: BTreeMap<String, ModuleConstructor>,
}

impl ModuleFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Creates a factory with every built-in module registered.
    pub fn builtin() -> Self {
        let mut factory = Self::new();
        factory.register(errorlist::CAPABILITY, |spec| {
            Ok(Arc::new(errorlist::ErrorListModule::new(spec)?))
        });
        factory.register(lexicon::CAPABILITY, |spec| {
            Ok(Arc::new(lexicon::LexiconModule::new(spec)?))
        });
        factory.register(confusible::CAPABILITY, |spec| {
            Ok(Arc::new(confusible::ConfusibleModule::new(spec)?))
        });
        factory.register(dummy::CAPABILITY, |spec| {
            Ok(Arc::new(dummy::DummyModule::new(spec)?))
        });
        factory
    }

    /// Registers a constructor under `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn(ModuleSpec) -> Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.constructors.insert(tag.to_string(), Arc::new(constructor));
        tracing::debug!("Registered module capability: {}", tag);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered capability tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Builds the module declared by `spec`.
    ///
    /// # Errors
    ///
    /// `UnknownModule` if the capability tag is not registered, or whatever
    /// the constructor reports for invalid options.
    pub fn create(&self, spec: ModuleSpec) -> Result<Arc<dyn Module>> {
        let constructor = self
            .constructors
            .get(&spec.capability)
            .ok_or_else(|| OrthosError::UnknownModule(spec.capability.clone()))?;
        constructor(spec)
    }
}

impl Default for ModuleFactory {
    fn default() -> Self {
        Self::builtin()
    }
}
