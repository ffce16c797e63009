//! Frame and phase timing utilities

use std::time::{Duration, Instant};

/// Simple stopwatch for measuring elapsed wall-clock time
///
/// Used for frame durations in the profiler and per-node CPU timings.
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Reset to zero and restart
    pub fn restart(&mut self) {
        self.elapsed = Duration::ZERO;
        self.start_time = Some(Instant::now());
    }

    /// Elapsed time, including the in-progress interval when running
    pub fn elapsed(&self) -> Duration {
        let running = self
            .start_time
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO);
        self.elapsed + running
    }

    /// Elapsed time in milliseconds
    pub fn elapsed_millis(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Elapsed time in nanoseconds
    pub fn elapsed_nanos(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    /// Whether the stopwatch is currently running
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwatch_accumulates_across_stop() {
        let mut watch = Stopwatch::start_new();
        watch.stop();
        let first = watch.elapsed();
        watch.start();
        watch.stop();

        assert!(watch.elapsed() >= first);
        assert!(!watch.is_running());
    }

    #[test]
    fn test_restart_clears_elapsed() {
        let mut watch = Stopwatch::start_new();
        std::thread::sleep(Duration::from_millis(1));
        watch.restart();

        assert!(watch.is_running());
        assert!(watch.elapsed() < Duration::from_millis(500));
    }
}
