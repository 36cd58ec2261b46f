use crate::Duration;

/// A monotonic timestamp, used for batch-age checks, reconnect backoff and
/// watchdog heartbeats.
#[derive(Copy, Clone, Debug)]
pub struct Instant(std::time::Instant);

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Self(std::time::Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from(self.0.elapsed())
    }

    #[inline]
    pub fn elapsed_since(&self, earlier: Instant) -> Duration {
        Duration::from(self.0.saturating_duration_since(earlier.0))
    }

    #[inline]
    pub fn saturating_sub(&self, other: Instant) -> Duration {
        Duration::from(self.0.saturating_duration_since(other.0))
    }
}

impl Default for Instant {
    fn default() -> Self {
        Self::now()
    }
}
