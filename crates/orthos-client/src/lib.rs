//! Orthos Client
//!
//! Talks to module servers: runs a module remotely, samples load, reads
//! server info and requests shutdown.

pub mod client;

pub use client::ModuleClient;
