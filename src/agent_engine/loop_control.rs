use std::time::{Duration, Instant};

use crate::config::ExecutionConfig;

/// Optional iteration and wall-clock caps for one session.
pub struct LoopController {
    max_iterations: Option<u32>,
    max_duration: Option<Duration>,
    start_time: Instant,
    iterations: u32,
}

impl LoopController {
    pub fn new(max_iterations: Option<u32>, max_duration: Option<Duration>) -> Self {
        Self {
            max_iterations,
            max_duration,
            start_time: Instant::now(),
            iterations: 0,
        }
    }

    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self::new(
            cfg.max_iterations,
            cfg.max_duration_minutes
                .map(|m| Duration::from_secs(u64::from(m) * 60)),
        )
    }

    /// Counts one capture → plan → dispatch cycle.
    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn should_stop(&self) -> bool {
        if let Some(max) = self.max_iterations {
            if self.iterations >= max {
                return true;
            }
        }
        if let Some(max) = self.max_duration {
            if self.start_time.elapsed() >= max {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_stops() {
        let mut ctrl = LoopController::new(None, None);
        for _ in 0..1000 {
            ctrl.record_iteration();
        }
        assert!(!ctrl.should_stop());
    }

    #[test]
    fn iteration_cap() {
        let mut ctrl = LoopController::new(Some(2), None);
        ctrl.record_iteration();
        assert!(!ctrl.should_stop());
        ctrl.record_iteration();
        assert!(ctrl.should_stop());
    }

    #[test]
    fn zero_duration_stops_immediately() {
        let ctrl = LoopController::new(None, Some(Duration::ZERO));
        assert!(ctrl.should_stop());
    }
}
