use std::sync::Mutex;

use evtforward_timing::Instant;

/// A named liveness counter. A generalization of the original
/// `HeartbeatHeart`: instead of a fixed-size ring buffer of recent beat
/// timestamps (used there only to compute an average period nothing here
/// needs), this just remembers the last beat — the watchdog only cares
/// how stale it is.
pub struct Heart {
    name: String,
    last_beat: Mutex<Instant>,
}

impl Heart {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), last_beat: Mutex::new(Instant::now()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn beat(&self) {
        *self.last_beat.lock().expect("heart mutex poisoned") = Instant::now();
    }

    pub fn millis_since_last_beat(&self) -> u64 {
        self.last_beat.lock().expect("heart mutex poisoned").elapsed().as_std().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn beat_resets_elapsed() {
        let heart = Heart::new("sender");
        thread::sleep(Duration::from_millis(20));
        assert!(heart.millis_since_last_beat() >= 20);
        heart.beat();
        assert!(heart.millis_since_last_beat() < 20);
    }
}
