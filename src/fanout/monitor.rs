//! Rolling update-rate diagnostic.

use tokio::time::Instant;

/// Passes between two rate checkpoints.
pub const CHECKPOINT_PASSES: u32 = 30;

/// Counts fan-out passes and reports the pass rate every
/// [`CHECKPOINT_PASSES`] passes.
#[derive(Debug, Clone)]
pub struct FrequencyMonitor {
    count: u32,
    checkpoint: Instant,
}

impl Default for FrequencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyMonitor {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            count: 0,
            checkpoint: start,
        }
    }

    /// Count one pass now.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Count one pass at `now`. Returns the rate in Hz on every checkpoint.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        if self.count < CHECKPOINT_PASSES {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.checkpoint).as_secs_f64();
        self.count = 0;
        self.checkpoint = now;
        if elapsed > 0.0 {
            Some(f64::from(CHECKPOINT_PASSES) / elapsed)
        } else {
            None
        }
    }
}
