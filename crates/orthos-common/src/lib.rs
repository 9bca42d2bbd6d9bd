//! Orthos Common Types and Transport
//!
//! Shared protocol definitions and the TCP transport used by the orchestrator
//! and by module servers.
//!
//! # Components
//!
//! - [`protocol`] - documents, suggestions, requests, responses and errors
//! - [`transport`] - length-prefixed JSON framing over TCP
//!
//! # Example
//!
//! ```
//! use orthos_common::{Document, Request, RunParameters};
//!
//! let doc = Document::from_text("letter", "I wa teh best.");
//! let request = Request::run("errorlist", doc, RunParameters::default())
//!     .with_timeout(5000);
//! assert_eq!(request.timeout_ms, Some(5000));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
