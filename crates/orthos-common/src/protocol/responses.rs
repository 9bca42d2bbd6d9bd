//! Response Types
//!
//! Every request is answered by exactly one `Response` carrying the request's
//! id. Failures travel as `(kind, message)` pairs so the caller can rebuild a
//! typed error.

use serde::{Deserialize, Serialize};

use super::document::Suggestion;
use super::error::{ErrorKind, OrthosError};
use super::RequestId;

/// A freshly taken load sample. Lower is better.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LoadSample {
    /// Requests currently executing the module
    pub in_flight: usize,
    /// Requests queued behind a non-reentrant module
    pub waiting: usize,
    /// Scalar used for endpoint selection
    pub load: f64,
}

impl LoadSample {
    pub fn new(in_flight: usize, waiting: usize) -> Self {
        Self {
            in_flight,
            waiting,
            load: (in_flight + waiting) as f64,
        }
    }
}

/// Identity and counters of a running module server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub module: String,
    pub capability: String,
    pub version: String,
    pub uptime_ms: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub mean_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    Suggestions { suggestions: Vec<Suggestion> },
    Load { sample: LoadSample },
    Info { info: ServerInfo },
    Ack,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    pub body: ResponseBody,
}

impl Response {
    pub fn suggestions(id: RequestId, suggestions: Vec<Suggestion>) -> Self {
        Response {
            id,
            body: ResponseBody::Suggestions { suggestions },
        }
    }

    pub fn load(id: RequestId, sample: LoadSample) -> Self {
        Response {
            id,
            body: ResponseBody::Load { sample },
        }
    }

    pub fn info(id: RequestId, info: ServerInfo) -> Self {
        Response {
            id,
            body: ResponseBody::Info { info },
        }
    }

    pub fn ack(id: RequestId) -> Self {
        Response {
            id,
            body: ResponseBody::Ack,
        }
    }

    pub fn error(id: RequestId, error: &OrthosError) -> Self {
        Response {
            id,
            body: ResponseBody::Error {
                kind: error.kind(),
                message: error.wire_message(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error { .. })
    }
}
