//! Module declarations.
//!
//! A [`ModuleSpec`] is built once when the configuration is loaded and is
//! read-only afterwards. Paths are already resolved against the corrector
//! root by the time a spec exists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use orthos_common::{OrthosError, Result};

/// A `(host, port)` pair addressing one running module server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for socket address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where a module's `run` executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Local,
    /// Servers presumed to run this exact module and model combination,
    /// in configuration order.
    Remote(Vec<Endpoint>),
}

impl ExecutionMode {
    pub fn endpoints(&self) -> &[Endpoint] {
        match self {
            ExecutionMode::Local => &[],
            ExecutionMode::Remote(endpoints) => endpoints,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ExecutionMode::Remote(_))
    }
}

/// Module-specific options, validated by each module's constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleOptions(BTreeMap<String, serde_json::Value>);

impl ModuleOptions {
    pub fn new(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self(values)
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn str(&self, module: &str, key: &str) -> Result<Option<String>> {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(invalid(module, key, "a string", other)),
        }
    }

    pub fn bool(&self, module: &str, key: &str) -> Result<Option<bool>> {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(invalid(module, key, "a boolean", other)),
        }
    }

    pub fn f64(&self, module: &str, key: &str) -> Result<Option<f64>> {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(module, key, "a number", value)),
        }
    }

    pub fn u64(&self, module: &str, key: &str) -> Result<Option<u64>> {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(module, key, "a non-negative integer", value)),
        }
    }

    /// A list of strings; a single string is accepted as a one-element list.
    pub fn str_list(&self, module: &str, key: &str) -> Result<Option<Vec<String>>> {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(module, key, "a list of strings", item))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(invalid(module, key, "a list of strings", other)),
        }
    }
}

fn invalid(module: &str, key: &str, expected: &str, got: &serde_json::Value) -> OrthosError {
    OrthosError::ConfigInvalid(format!(
        "module '{}': option '{}' must be {}, got {}",
        module, key, expected, got
    ))
}

/// Declaration of one module within a corrector.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSpec {
    /// Unique within the owning corrector
    pub id: String,
    /// Capability tag resolved through the module factory
    pub capability: String,
    /// Source corpora; position `i` produces `models[i]`
    pub sources: Vec<PathBuf>,
    pub models: Vec<PathBuf>,
    pub options: ModuleOptions,
    pub mode: ExecutionMode,
    /// Run in-process when no server is available instead of failing
    pub fallback_local: bool,
    /// Per-module run timeout; the corrector default applies when unset
    pub timeout: Option<Duration>,
}

impl ModuleSpec {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            sources: Vec::new(),
            models: Vec::new(),
            options: ModuleOptions::default(),
            mode: ExecutionMode::Local,
            fallback_local: false,
            timeout: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        self.sources.push(source.into());
        self.models.push(model.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<PathBuf>) -> Self {
        self.models.push(model.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options = self.options.with(key, value);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.mode = if endpoints.is_empty() {
            ExecutionMode::Local
        } else {
            ExecutionMode::Remote(endpoints)
        };
        self
    }

    pub fn with_fallback_local(mut self, fallback: bool) -> Self {
        self.fallback_local = fallback;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks the structural invariants that do not depend on the module type.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(OrthosError::ConfigInvalid(
                "module id must not be empty".to_string(),
            ));
        }
        if self.capability.trim().is_empty() {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': capability tag must not be empty",
                self.id
            )));
        }
        if !self.sources.is_empty() && self.sources.len() != self.models.len() {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': {} sources but {} models, they must be paired",
                self.id,
                self.sources.len(),
                self.models.len()
            )));
        }
        for endpoint in self.mode.endpoints() {
            if endpoint.host.trim().is_empty() || endpoint.port == 0 {
                return Err(OrthosError::ConfigInvalid(format!(
                    "module '{}': invalid server endpoint '{}'",
                    self.id, endpoint
                )));
            }
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': timeout must be greater than zero",
                self.id
            )));
        }
        Ok(())
    }

    /// Source/model pairs, in declaration order.
    pub fn artifacts(&self) -> impl Iterator<Item = (&PathBuf, &PathBuf)> {
        self.sources.iter().zip(self.models.iter())
    }
}
