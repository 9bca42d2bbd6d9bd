use std::fmt;
use std::time::Instant;

use orthos_common::LoadSample;
use orthos_modules::Endpoint;

/// Outcome of the most recent probe of a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Reachable,
    Unreachable(String),
}

/// A module server as seen by one selection round.
///
/// Handles are rebuilt on every probe; nothing is carried over between
/// calls, so an endpoint that was down is simply probed again next time.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    pub endpoint: Endpoint,
    pub health: Health,
    pub load: Option<LoadSample>,
    pub probed_at: Instant,
}

impl ServerHandle {
    pub fn reachable(endpoint: Endpoint, load: LoadSample) -> Self {
        Self {
            endpoint,
            health: Health::Reachable,
            load: Some(load),
            probed_at: Instant::now(),
        }
    }

    pub fn unreachable(endpoint: Endpoint, reason: impl Into<String>) -> Self {
        Self {
            endpoint,
            health: Health::Unreachable(reason.into()),
            load: None,
            probed_at: Instant::now(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.health == Health::Reachable
    }

    /// Scalar load used for selection; `None` when unreachable.
    pub fn load_value(&self) -> Option<f64> {
        match self.health {
            Health::Reachable => self.load.map(|s| s.load),
            Health::Unreachable(_) => None,
        }
    }
}

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.health, &self.load) {
            (Health::Reachable, Some(sample)) => write!(
                f,
                "{} up, load {} ({} running, {} waiting)",
                self.endpoint, sample.load, sample.in_flight, sample.waiting
            ),
            (Health::Reachable, None) => write!(f, "{} up", self.endpoint),
            (Health::Unreachable(reason), _) => write!(f, "{} down: {}", self.endpoint, reason),
        }
    }
}
