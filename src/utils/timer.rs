//! Timer utilities
//!
//! `Timer` measures one unit or fixture; `Stopwatch` records the run phases
//! (discovery, selection, execution).

use std::time::{Duration, Instant};
use tracing::debug;

/// Measures a single span of work
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        debug!("{} took {:.3}s", self.label, elapsed.as_secs_f64());
        elapsed
    }
}

/// Phase timer for a whole run
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            laps: Vec::new(),
        }
    }

    /// Close the current phase under `label`
    pub fn lap(&mut self, label: impl Into<String>) {
        self.laps.push((label.into(), self.start.elapsed()));
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Duration of each phase, not cumulative
    pub fn lap_times(&self) -> Vec<(String, Duration)> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|(label, cumulative)| {
                let lap = cumulative.saturating_sub(prev);
                prev = *cumulative;
                (label.clone(), lap)
            })
            .collect()
    }

    pub fn format(&self) -> String {
        let mut parts: Vec<String> = self
            .lap_times()
            .into_iter()
            .map(|(label, d)| format!("{label}={:.3}s", d.as_secs_f64()))
            .collect();
        parts.push(format!("total={:.3}s", self.total().as_secs_f64()));
        parts.join(" ")
    }

    pub fn log(&self) {
        debug!("phases: {}", self.format());
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("unit");
        sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }

    #[test]
    fn test_stopwatch_laps() {
        let mut sw = Stopwatch::new();
        sleep(Duration::from_millis(5));
        sw.lap("discovery");
        sleep(Duration::from_millis(5));
        sw.lap("execution");

        let laps = sw.lap_times();
        assert_eq!(laps.len(), 2);
        assert_eq!(laps[0].0, "discovery");
        assert!(laps[1].1 >= Duration::from_millis(5));
        assert!(sw.format().starts_with("discovery="));
        assert!(sw.format().contains("total="));
    }
}
