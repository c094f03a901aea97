//! Sleep-step backoff shared by both watchers.

use std::time::Duration;

/// # Sleep Step
///
/// Multiplier applied to a base delay: grows by one on every tick without
/// news (up to `max_steps`) and drops back to one as soon as something new
/// arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepStep {
    current: u32,
    max_steps: u32,
    step: Duration,
}

impl SleepStep {
    pub fn new(max_steps: u32, step_sleep_time_msec: u64) -> Self {
        Self {
            current: 1,
            max_steps: max_steps.max(1),
            step: Duration::from_millis(step_sleep_time_msec),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Nothing new this tick.
    pub fn on_empty(&mut self) {
        if self.current < self.max_steps {
            self.current += 1;
        }
    }

    /// Something new this tick.
    pub fn on_activity(&mut self) {
        self.current = 1;
    }

    /// Delay before the next tick.
    pub fn delay(&self) -> Duration {
        self.step * self.current
    }
}
