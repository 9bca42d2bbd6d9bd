//! Orthos Transport Layer
//!
//! TCP transport between the orchestrator and module servers.
//!
//! # Wire Format
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON data]`
//!
//! Frames larger than 100 MB are rejected before the payload is read.
//!
//! # Example
//!
//! ```no_run
//! use orthos_common::transport::TcpTransport;
//! use orthos_common::protocol::Request;
//!
//! # #[tokio::main]
//! # async fn main() -> orthos_common::Result<()> {
//! let transport = TcpTransport::new();
//! let mut stream = transport.connect("127.0.0.1:12346").await?;
//! let response = transport.send_request(&mut stream, &Request::info()).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod tcp;
pub mod tcp_server;

pub use codec::{JsonCodec, MAX_MESSAGE_SIZE};
pub use tcp::{TcpTransport, DEFAULT_CONNECT_TIMEOUT};
pub use tcp_server::{ShutdownHandle, ShutdownSignal, TcpServer};

#[cfg(test)]
mod tests;
