// Copyright 2025 Orthos Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use orthos_common::protocol::LoadSample;

/// Request counters and live load gauges for one module server.
///
/// All updates are lock-free; a load sample reads the gauges at the moment
/// it is taken.
#[derive(Debug)]
pub struct ServerStats {
    started: Instant,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_latency_us: AtomicU64,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Records a finished run request.
    pub fn record_call(&self, start_time: Instant, success: bool) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts a run as executing until the guard is dropped.
    pub fn track_in_flight(self: &Arc<Self>) -> GaugeGuard {
        GaugeGuard::enter(self.clone(), |s| &s.in_flight)
    }

    /// Counts a run as queued behind the module until the guard is dropped.
    pub fn track_waiting(self: &Arc<Self>) -> GaugeGuard {
        GaugeGuard::enter(self.clone(), |s| &s.waiting)
    }

    pub fn load_sample(&self) -> LoadSample {
        LoadSample::new(
            self.in_flight.load(Ordering::SeqCst),
            self.waiting.load(Ordering::SeqCst),
        )
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn mean_latency_ms(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.total_latency_us.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Increments a gauge on creation and decrements it on drop.
pub struct GaugeGuard {
    stats: Arc<ServerStats>,
    gauge: fn(&ServerStats) -> &AtomicUsize,
}

impl GaugeGuard {
    fn enter(stats: Arc<ServerStats>, gauge: fn(&ServerStats) -> &AtomicUsize) -> Self {
        gauge(&stats).fetch_add(1, Ordering::SeqCst);
        Self { stats, gauge }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        (self.gauge)(&self.stats).fetch_sub(1, Ordering::SeqCst);
    }
}
