//! Orthos Orchestrator
//!
//! Loads a corrector configuration and drives its modules: concurrent
//! dispatch of `run` across local modules and remote module servers, the
//! reset / train / test / tune lifecycle, evaluation against a reference,
//! and management of module servers on this host.

pub mod annotated;
pub mod config;
pub mod corrector;
pub mod dispatcher;
pub mod evaluation;
pub mod lifecycle;
pub mod selector;
pub mod server_handle;
pub mod servers;

pub use annotated::{AnnotatedDocument, ModuleAnnotations, ModuleFailure};
pub use config::{CorrectorConfig, ModuleDecl, RetryConfig};
pub use corrector::Corrector;
pub use dispatcher::Dispatcher;
pub use evaluation::{EvaluationReport, Reference, Scores};
pub use lifecycle::{LifecycleReport, Outcome, Stage};
pub use selector::{pick_least_loaded, ClientProbe, EndpointSelector, LoadProbe};
pub use server_handle::{Health, ServerHandle};
pub use servers::{ServerOutcome, ServerReport, ServerStatus, StartOptions};
