use crate::{Duration, Instant};

/// Fires at most once per `interval`, used for the sender loop's heartbeat
/// tick, the watchdog's monitor tick and a sink's reconnect backoff.
///
/// `last_acted` is `None` until the first fire so a freshly constructed
/// `Repeater` (or one reset with [`Repeater::force_fire`]) always fires on
/// its very next check, without needing a sentinel "zero" instant.
#[derive(Clone, Copy, Debug)]
pub struct Repeater {
    interval: Duration,
    last_acted: Option<Instant>,
}

impl Repeater {
    #[inline]
    pub fn every(interval: Duration) -> Self {
        Self { interval, last_acted: None }
    }

    /// Calls `f` with the elapsed time since the last fire, at most once per
    /// `interval`.
    #[inline]
    pub fn maybe<F>(&mut self, mut f: F)
    where
        F: FnMut(Duration),
    {
        if self.fired_inner() {
            f(self.last_acted.expect("just set").elapsed());
        }
    }

    #[inline]
    pub fn fired(&mut self) -> bool {
        self.fired_inner()
    }

    fn fired_inner(&mut self) -> bool {
        let due = match self.last_acted {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        };
        if due {
            self.last_acted = Some(Instant::now());
        }
        due
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Resets the clock without forcing an immediate fire.
    pub fn reset(&mut self) {
        self.last_acted = Some(Instant::now());
    }

    /// Forces the next call to `fired`/`maybe` to fire immediately.
    pub fn force_fire(&mut self) {
        self.last_acted = None;
    }
}
