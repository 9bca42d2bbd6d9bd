//! Per-request limits for module servers.
//!
//! A module's `run` is opaque blocking code, so the server bounds how long a
//! caller waits for it. The computation itself is abandoned, not interrupted,
//! when the limit expires.

use std::time::Duration;

/// Resource limits applied to every request a module server handles.
///
/// # Example
///
/// ```
/// use orthos_server::ServerLimits;
/// use std::time::Duration;
///
/// let limits = ServerLimits::new()
///     .with_request_timeout(Duration::from_secs(5));
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerLimits {
    /// Maximum time a run request may take, waiting for the module included
    pub request_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The effective limit for a request that asked for `requested_ms`.
    /// The shorter of the two wins.
    pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) if ms > 0 => self.request_timeout.min(Duration::from_millis(ms)),
            _ => self.request_timeout,
        }
    }

    /// # Errors
    ///
    /// Returns an error if:
    /// - Request timeout is zero
    /// - Request timeout is longer than one hour
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout.is_zero() {
            return Err("request timeout must be greater than zero".to_string());
        }

        if self.request_timeout.as_secs() > 3600 {
            return Err(format!(
                "request timeout must be <= 1 hour (got {} seconds)",
                self.request_timeout.as_secs()
            ));
        }

        Ok(())
    }
}
