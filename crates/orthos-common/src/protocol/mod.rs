pub mod document;
pub mod error;
pub mod requests;
pub mod responses;


pub use document::{Document, Replacement, Span, Suggestion, Token};
pub use error::{ErrorKind, OrthosError, Result};
pub use requests::{Request, RequestBody, RequestId, RunParameters};
pub use responses::{LoadSample, Response, ResponseBody, ServerInfo};
