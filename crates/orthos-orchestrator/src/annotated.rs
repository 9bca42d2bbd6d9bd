//! Result artifact of a `run`.

use serde::{Deserialize, Serialize};

use orthos_common::{Document, ErrorKind, OrthosError, Suggestion};

/// Suggestions contributed by one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAnnotations {
    pub module: String,
    pub suggestions: Vec<Suggestion>,
}

/// A module that contributed nothing to this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub module: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ModuleFailure {
    pub fn new(module: impl Into<String>, error: &OrthosError) -> Self {
        Self {
            module: module.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// The input document with every successful module's suggestions attached.
///
/// `annotations` follow module registration order, whatever order the
/// modules finished in. `partial` is set when any module failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub document: Document,
    pub annotations: Vec<ModuleAnnotations>,
    #[serde(default)]
    pub failures: Vec<ModuleFailure>,
    #[serde(default)]
    pub partial: bool,
}

impl AnnotatedDocument {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            annotations: Vec::new(),
            failures: Vec::new(),
            partial: false,
        }
    }

    pub fn annotate(&mut self, module: impl Into<String>, suggestions: Vec<Suggestion>) {
        self.annotations.push(ModuleAnnotations {
            module: module.into(),
            suggestions,
        });
    }

    pub fn fail(&mut self, module: impl Into<String>, error: &OrthosError) {
        self.failures.push(ModuleFailure::new(module, error));
        self.partial = true;
    }

    /// Ids of the modules that succeeded, in registration order.
    pub fn succeeded(&self) -> Vec<&str> {
        self.annotations.iter().map(|a| a.module.as_str()).collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.module.as_str()).collect()
    }

    pub fn suggestions_of(&self, module: &str) -> Option<&[Suggestion]> {
        self.annotations
            .iter()
            .find(|a| a.module == module)
            .map(|a| a.suggestions.as_slice())
    }

    /// Every suggestion with the module that produced it.
    pub fn suggestions(&self) -> impl Iterator<Item = (&str, &Suggestion)> {
        self.annotations
            .iter()
            .flat_map(|a| a.suggestions.iter().map(move |s| (a.module.as_str(), s)))
    }
}
