// Timed animation phase: an explicit { duration, elapsed } record advanced per tick

use std::time::Duration;

/// Result of advancing a phase by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    Running,
    /// The phase ended during this tick; `overflow` is the part of the tick
    /// left over for whatever phase is chained after it.
    Finished { overflow: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    duration: Duration,
    elapsed: Duration,
}

impl Phase {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            elapsed: Duration::ZERO,
        }
    }

    pub fn advance(&mut self, dt: Duration) -> PhaseStep {
        self.elapsed = self.elapsed.saturating_add(dt);
        if self.elapsed >= self.duration {
            let overflow = self.elapsed - self.duration;
            self.elapsed = self.duration;
            PhaseStep::Finished { overflow }
        } else {
            PhaseStep::Running
        }
    }

    /// Normalised progress in `[0, 1]`; zero-length phases count as done.
    pub fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0) as f32
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
