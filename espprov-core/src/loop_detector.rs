//! Bound for polling loops: elapsed time and iteration count

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Trips once a loop has run more than `max_iterations` times or for longer
/// than `timeout` since the last [`reset`](LoopDetector::reset).
///
/// A detector that was never reset is tripped.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    timeout: Duration,
    max_iterations: u32,
    start_time: Option<Instant>,
    iteration_count: u32,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_ITERATIONS)
    }
}

impl LoopDetector {
    pub fn new(timeout: Duration, max_iterations: u32) -> Self {
        Self {
            timeout,
            max_iterations,
            start_time: None,
            iteration_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.start_time = Some(Instant::now());
        self.iteration_count = 0;
    }

    /// Count one iteration, returns true when the loop must stop
    pub fn detect_loop(&mut self) -> bool {
        self.iteration_count = self.iteration_count.saturating_add(1);
        if self.iteration_count > self.max_iterations {
            return true;
        }
        match self.start_time {
            Some(start) => start.elapsed() > self.timeout,
            None => true,
        }
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }
}
