//! Wall-clock timing for runs and streams

#![allow(dead_code)]

use std::time::{Duration, Instant};

/// Measures one phase of a run
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    phase: String,
}

impl Timer {
    pub fn start(phase: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            phase: phase.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed milliseconds, the unit every result reports time in
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Finish the phase, logging and returning its duration in milliseconds
    pub fn stop(self) -> u64 {
        let millis = self.elapsed_ms();
        tracing::debug!("{} took {}ms", self.phase, millis);
        millis
    }
}
