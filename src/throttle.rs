use std::time::{Duration, Instant};

/// Throttle helper to prevent excessive redraws
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    last_update: Option<Instant>,
    min_interval: Duration,
}

impl UpdateThrottle {
    /// The first check always passes.
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_update: None,
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn should_update(&mut self) -> bool {
        self.should_update_at(Instant::now())
    }

    pub fn should_update_at(&mut self, now: Instant) -> bool {
        let due = match self.last_update {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        };
        if due {
            self.last_update = Some(now);
        }
        due
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
