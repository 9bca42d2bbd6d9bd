use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrthosError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("[{module}] Source not found: {}", path.display())]
    MissingSource { module: String, path: PathBuf },

    #[error("[{module}] Model missing: {}", path.display())]
    ModelMissing { module: String, path: PathBuf },

    #[error("[{module}] Training failed: {message}")]
    TrainingFailure { module: String, message: String },

    #[error("[{module}] Run failed: {message}")]
    RunFailure { module: String, message: String },

    #[error("No available server for module {0}")]
    NoAvailableServer(String),

    #[error("Port already in use: {0}")]
    PortInUse(String),

    #[error("Endpoint {endpoint} unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("No module succeeded")]
    NoModuleSucceeded,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-level classification of an [`OrthosError`].
///
/// Servers report failures as `(kind, message)` pairs; clients rebuild a
/// matching error with [`OrthosError::from_wire`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    MissingSource,
    ModelMissing,
    TrainingFailure,
    RunFailure,
    NoAvailableServer,
    PortInUse,
    Unreachable,
    PermissionDenied,
    UnknownModule,
    NoModuleSucceeded,
    Transport,
    Connection,
    Timeout,
    InvalidRequest,
    InvalidResponse,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::MissingSource => "MissingSource",
            ErrorKind::ModelMissing => "ModelMissing",
            ErrorKind::TrainingFailure => "TrainingFailure",
            ErrorKind::RunFailure => "RunFailure",
            ErrorKind::NoAvailableServer => "NoAvailableServer",
            ErrorKind::PortInUse => "PortInUse",
            ErrorKind::Unreachable => "Unreachable",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::UnknownModule => "UnknownModule",
            ErrorKind::NoModuleSucceeded => "NoModuleSucceeded",
            ErrorKind::Transport => "Transport",
            ErrorKind::Connection => "Connection",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::InvalidResponse => "InvalidResponse",
            ErrorKind::Io => "IOError",
        };
        f.write_str(name)
    }
}

impl OrthosError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrthosError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            OrthosError::MissingSource { .. } => ErrorKind::MissingSource,
            OrthosError::ModelMissing { .. } => ErrorKind::ModelMissing,
            OrthosError::TrainingFailure { .. } => ErrorKind::TrainingFailure,
            OrthosError::RunFailure { .. } => ErrorKind::RunFailure,
            OrthosError::NoAvailableServer(_) => ErrorKind::NoAvailableServer,
            OrthosError::PortInUse(_) => ErrorKind::PortInUse,
            OrthosError::Unreachable { .. } => ErrorKind::Unreachable,
            OrthosError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            OrthosError::UnknownModule(_) => ErrorKind::UnknownModule,
            OrthosError::NoModuleSucceeded => ErrorKind::NoModuleSucceeded,
            OrthosError::Transport(_) => ErrorKind::Transport,
            OrthosError::Connection(_) => ErrorKind::Connection,
            OrthosError::Timeout(_) => ErrorKind::Timeout,
            OrthosError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            OrthosError::InvalidResponse(_) | OrthosError::JsonSerialization(_) => {
                ErrorKind::InvalidResponse
            }
            OrthosError::Io(_) => ErrorKind::Io,
        }
    }

    /// Transient failures are worth retrying against a freshly selected endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrthosError::Unreachable { .. } | OrthosError::Connection(_) | OrthosError::Timeout(_)
        )
    }

    /// Rebuilds an error reported by a remote server for `module`.
    ///
    /// Path-carrying variants lose their structure on the wire, so the
    /// message is kept as the path.
    pub fn from_wire(module: &str, kind: ErrorKind, message: String) -> Self {
        let module = module.to_string();
        match kind {
            ErrorKind::ConfigInvalid => OrthosError::ConfigInvalid(message),
            ErrorKind::MissingSource => OrthosError::MissingSource {
                module,
                path: PathBuf::from(message),
            },
            ErrorKind::ModelMissing => OrthosError::ModelMissing {
                module,
                path: PathBuf::from(message),
            },
            ErrorKind::TrainingFailure => OrthosError::TrainingFailure { module, message },
            ErrorKind::RunFailure => OrthosError::RunFailure { module, message },
            ErrorKind::NoAvailableServer => OrthosError::NoAvailableServer(module),
            ErrorKind::PortInUse => OrthosError::PortInUse(message),
            ErrorKind::Unreachable => OrthosError::Unreachable {
                endpoint: module,
                message,
            },
            ErrorKind::PermissionDenied => OrthosError::PermissionDenied(PathBuf::from(message)),
            ErrorKind::UnknownModule => OrthosError::UnknownModule(message),
            ErrorKind::NoModuleSucceeded => OrthosError::NoModuleSucceeded,
            ErrorKind::Transport => OrthosError::Transport(message),
            ErrorKind::Connection => OrthosError::Connection(message),
            ErrorKind::Timeout => OrthosError::Timeout(message.parse().unwrap_or(0)),
            ErrorKind::InvalidRequest => OrthosError::InvalidRequest(message),
            ErrorKind::InvalidResponse => OrthosError::InvalidResponse(message),
            ErrorKind::Io => OrthosError::Io(std::io::Error::other(message)),
        }
    }

    /// Message half of the `(kind, message)` wire pair.
    ///
    /// For path-carrying variants this is the bare path so that
    /// [`from_wire`](Self::from_wire) restores it.
    pub fn wire_message(&self) -> String {
        match self {
            OrthosError::MissingSource { path, .. } | OrthosError::ModelMissing { path, .. } => {
                path.display().to_string()
            }
            OrthosError::PermissionDenied(path) => path.display().to_string(),
            OrthosError::TrainingFailure { message, .. } | OrthosError::RunFailure { message, .. } => {
                message.clone()
            }
            OrthosError::Timeout(ms) => ms.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrthosError>;
