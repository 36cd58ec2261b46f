use evtforward_timing::Duration;
use rand::Rng;

const SCHEDULE_SECS: [u64; 5] = [1, 2, 4, 8, 30];

/// Exponential reconnect backoff, 1s/2s/4s/8s capped at 30s plus up to 20%
/// jitter — a deliberate replacement for the legacy "2, 10, 60" schedule
/// found in the original's commented-out tests.
#[derive(Debug, Default)]
pub struct Backoff {
    failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { failures: 0 }
    }

    /// Duration to wait before the next reconnect attempt, given the
    /// number of consecutive failures so far.
    pub fn next_delay(&mut self) -> Duration {
        let idx = (self.failures as usize).min(SCHEDULE_SECS.len() - 1);
        self.failures = self.failures.saturating_add(1);
        let base = SCHEDULE_SECS[idx];
        let jitter_ms = rand::rng().random_range(0..=(base * 200));
        Duration::from_millis(base * 1000 + jitter_ms)
    }

    /// Resets the schedule after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_climbs_and_caps() {
        let mut backoff = Backoff::new();
        let mut secs = Vec::new();
        for _ in 0..7 {
            secs.push(backoff.next_delay().as_secs_f64());
        }
        assert!(secs[0] >= 1.0 && secs[0] < 1.2);
        assert!(secs[1] >= 2.0 && secs[1] < 2.4);
        assert!(secs[4] >= 30.0 && secs[4] < 36.0);
        assert!(secs[6] >= 30.0 && secs[6] < 36.0, "schedule caps at 30s");
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay().as_secs_f64() < 1.2);
    }
}
