//! Corrector configuration.
//!
//! A JSON document naming the corrector, its global settings and the ordered
//! list of module declarations. Everything is validated before any module is
//! constructed; the first violation is reported as `ConfigInvalid`.
//!
//! ```json
//! {
//!   "id": "demo",
//!   "threads": 4,
//!   "modules": [
//!     { "module": "errorlist", "id": "errorlist", "source": "errors.tsv", "model": "errors.model" },
//!     { "module": "confusible", "id": "confusible", "model": "conf.model",
//!       "sets": ["then|than"], "servers": [{ "host": "localhost", "port": 12346 }] }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use orthos_common::{OrthosError, Result};
use orthos_modules::{Endpoint, ModuleFactory, ModuleOptions, ModuleSpec};

/// Retry policy with exponential backoff.
///
/// Used for transient remote failures during `run` and for
/// `TrainingFailure` during `train`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding initial attempt)
    ///
    /// Total attempts = max_retries + 1
    pub max_retries: usize,
    /// First retry waits this long
    pub initial_backoff_ms: u64,
    /// Exponential backoff is capped at this value
    pub max_backoff_ms: u64,
    /// Each retry waits: previous_backoff * multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((ms as u64).min(self.max_backoff_ms))
    }

    fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(OrthosError::ConfigInvalid(format!(
                "retry.backoff_multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(OrthosError::ConfigInvalid(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Module options that name files; resolved against the root like sources.
const PATH_OPTIONS: &[&str] = &["test_source", "tune_source"];

/// A single path or a list of paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathList {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl Default for PathList {
    fn default() -> Self {
        PathList::Many(Vec::new())
    }
}

impl PathList {
    pub fn to_vec(&self) -> Vec<PathBuf> {
        match self {
            PathList::One(path) => vec![path.clone()],
            PathList::Many(paths) => paths.clone(),
        }
    }
}

/// One module declaration. Keys not listed here are module options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDecl {
    /// Capability tag
    pub module: String,
    pub id: String,
    #[serde(default, alias = "source")]
    pub sources: PathList,
    #[serde(default, alias = "model")]
    pub models: PathList,
    #[serde(default)]
    pub servers: Vec<Endpoint>,
    /// Run in-process even when servers are listed
    #[serde(default)]
    pub local: bool,
    /// Run in-process when none of the servers is reachable
    #[serde(default)]
    pub fallback_local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_threads() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectorConfig {
    pub id: String,
    /// Base for relative source and model paths. Defaults to the directory
    /// holding the configuration file; a relative root is taken relative to
    /// that directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Maximum number of modules dispatched at once
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Per-module run timeout unless a module overrides it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout of each load query during endpoint selection
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    pub modules: Vec<ModuleDecl>,
}

impl CorrectorConfig {
    /// Loads a configuration file, resolving the root against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OrthosError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_str(&contents, base)
    }

    /// Parses a configuration document; `base_dir` stands in for the
    /// directory of the configuration file.
    pub fn from_str(contents: &str, base_dir: &Path) -> Result<Self> {
        let mut config: CorrectorConfig = serde_json::from_str(contents)
            .map_err(|e| OrthosError::ConfigInvalid(format!("malformed configuration: {}", e)))?;

        let root = match config.root.take() {
            Some(root) if root.is_absolute() => root,
            Some(root) => base_dir.join(root),
            None => base_dir.to_path_buf(),
        };
        config.root = Some(root);
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        self.root.as_deref().unwrap_or_else(|| Path::new("."))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Checks every declaration without constructing any module.
    pub fn validate(&self, factory: &ModuleFactory) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(OrthosError::ConfigInvalid("corrector id must not be empty".to_string()));
        }
        if self.threads == 0 {
            return Err(OrthosError::ConfigInvalid("threads must be at least 1".to_string()));
        }
        if self.timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(OrthosError::ConfigInvalid(
                "timeout_ms and probe_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.retry.validate()?;
        if self.modules.is_empty() {
            return Err(OrthosError::ConfigInvalid(format!(
                "corrector '{}' declares no modules",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for decl in &self.modules {
            if decl.id.trim().is_empty() {
                return Err(OrthosError::ConfigInvalid(format!(
                    "a '{}' module has an empty id",
                    decl.module
                )));
            }
            if !seen.insert(decl.id.as_str()) {
                return Err(OrthosError::ConfigInvalid(format!(
                    "duplicate module id '{}'",
                    decl.id
                )));
            }
            if !factory.contains(&decl.module) {
                return Err(OrthosError::ConfigInvalid(format!(
                    "module '{}': unknown capability '{}' (known: {})",
                    decl.id,
                    decl.module,
                    factory.tags().join(", ")
                )));
            }
            self.module_spec(decl).validate()?;
        }
        Ok(())
    }

    /// Module specs in declaration order, keyed by id.
    ///
    /// Call [`validate`](Self::validate) first; duplicate ids are still
    /// rejected here.
    pub fn module_specs(&self) -> Result<IndexMap<String, ModuleSpec>> {
        let mut specs = IndexMap::with_capacity(self.modules.len());
        for decl in &self.modules {
            let spec = self.module_spec(decl);
            if specs.insert(spec.id.clone(), spec).is_some() {
                return Err(OrthosError::ConfigInvalid(format!(
                    "duplicate module id '{}'",
                    decl.id
                )));
            }
        }
        Ok(specs)
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.root().join(path)
        }
    }

    fn module_spec(&self, decl: &ModuleDecl) -> ModuleSpec {
        let resolve_all = |paths: &PathList| -> Vec<PathBuf> {
            paths.to_vec().into_iter().map(|p| self.resolve(p)).collect()
        };

        let mut options = decl.options.clone();
        for key in PATH_OPTIONS {
            // non-string values are left for the module to reject
            if let Some(serde_json::Value::String(path)) = options.get_mut(*key) {
                *path = self.resolve(PathBuf::from(&*path)).to_string_lossy().into_owned();
            }
        }

        let mut spec = ModuleSpec::new(decl.id.clone(), decl.module.clone());
        spec.sources = resolve_all(&decl.sources);
        spec.models = resolve_all(&decl.models);
        spec.options = ModuleOptions::new(options);
        spec.fallback_local = decl.fallback_local;
        spec.timeout = decl.timeout_ms.map(Duration::from_millis);
        if !decl.local {
            spec = spec.with_endpoints(decl.servers.clone());
        }
        spec
    }
}
