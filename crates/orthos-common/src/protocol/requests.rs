use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::document::Document;

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-run overrides passed along with every module invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunParameters {
    /// Run every selected module in-process, ignoring configured servers
    #[serde(default)]
    pub force_local: bool,
    /// Override of the corrector's thread budget for this run
    #[serde(default)]
    pub threads: Option<usize>,
    /// Override of every module's timeout for this run
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub debug: bool,
    /// Free-form `key=value` parameters handed to modules unchanged
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl RunParameters {
    /// Parses `key=value` pairs as given on the command line.
    pub fn with_extra<I, S>(mut self, pairs: I) -> std::result::Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Parameter '{}' is not of the form key=value", pair))?;
            self.extra.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// Run the served module over a document
    Run {
        module: String,
        document: Document,
        parameters: RunParameters,
    },
    /// Sample the server's current load
    Load,
    /// Report server identity and counters
    Info,
    /// Stop the server; `force` skips draining in-flight requests
    Shutdown { force: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub body: RequestBody,
    pub timeout_ms: Option<u64>,
}

impl Request {
    pub fn new(body: RequestBody) -> Self {
        Request {
            id: generate_request_id(),
            body,
            timeout_ms: None,
        }
    }

    pub fn run(module: impl Into<String>, document: Document, parameters: RunParameters) -> Self {
        Self::new(RequestBody::Run {
            module: module.into(),
            document,
            parameters,
        })
    }

    pub fn load() -> Self {
        Self::new(RequestBody::Load)
    }

    pub fn info() -> Self {
        Self::new(RequestBody::Info)
    }

    pub fn shutdown(force: bool) -> Self {
        Self::new(RequestBody::Shutdown { force })
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // upper 32 bits from the clock, lower 32 from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
