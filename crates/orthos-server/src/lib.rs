//! Orthos Module Server
//!
//! Wraps one module and serves its `run` operation, load sampling and
//! server info over TCP until stopped.

pub mod limits;
pub mod server;
pub mod stats;

pub use limits::ServerLimits;
pub use server::ModuleServer;
pub use stats::ServerStats;
