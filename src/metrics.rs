//! Throughput accounting for frame pipelines

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Outcome of pumping frames from a source into a sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeReport {
    pub frames: u64,
    pub bytes: u64,
    pub elapsed_ms: u64,
}

impl TranscodeReport {
    pub fn record_frame(&mut self, bytes: usize) {
        self.frames += 1;
        self.bytes += bytes as u64;
    }

    pub fn fps(&self) -> f64 {
        if self.elapsed_ms > 0 {
            self.frames as f64 * 1000.0 / self.elapsed_ms as f64
        } else {
            0.0
        }
    }
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
