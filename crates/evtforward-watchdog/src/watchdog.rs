use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use evtforward_timing::Duration;
use tracing::{error, info};

use crate::heart::Heart;

type FailureHandler = Box<dyn Fn(&str) + Send + Sync>;

struct Shared {
    hearts: Mutex<Vec<Arc<Heart>>>,
    tick: Duration,
    failure_after: Duration,
    on_failure: FailureHandler,
    stop: AtomicBool,
}

/// Monitor thread: every `tick`, checks each registered [`Heart`] and
/// invokes `on_failure` once a heart's last beat is older than
/// `failure_after`. A direct generalization of the original
/// `Heartbeat`/`HeartbeatHeart` pair, with the process-wide singleton
/// replaced by an explicit handle the caller constructs and wires itself.
pub struct Watchdog {
    shared: Arc<Shared>,
}

/// Owns the monitor thread; dropping or calling [`WatchdogHandle::stop`]
/// joins it.
pub struct WatchdogHandle {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new(tick: Duration, failure_after: Duration, on_failure: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                hearts: Mutex::new(Vec::new()),
                tick,
                failure_after,
                on_failure: Box::new(on_failure),
                stop: AtomicBool::new(false),
            }),
        }
    }

    pub fn add_heart(&self, name: impl Into<String>) -> Arc<Heart> {
        let heart = Arc::new(Heart::new(name));
        self.shared.hearts.lock().expect("watchdog mutex poisoned").push(heart.clone());
        heart
    }

    pub fn start(self) -> WatchdogHandle {
        let shared = self.shared;
        let monitor = shared.clone();
        let join = thread::spawn(move || monitor_loop(monitor));
        WatchdogHandle { shared, join: Some(join) }
    }
}

fn monitor_loop(shared: Arc<Shared>) {
    info!("watchdog monitor started");
    while !shared.stop.load(Ordering::Relaxed) {
        thread::sleep(shared.tick.as_std());
        let hearts = shared.hearts.lock().expect("watchdog mutex poisoned").clone();
        for heart in &hearts {
            let stale_ms = heart.millis_since_last_beat();
            if stale_ms > shared.failure_after.as_std().as_millis() as u64 {
                error!(heart = heart.name(), stale_ms, "heart missed its beat threshold");
                (shared.on_failure)(heart.name());
            }
        }
    }
}

impl WatchdogHandle {
    pub fn stop(mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn fires_failure_handler_for_stale_heart() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let watchdog = Watchdog::new(Duration::from_millis(10), Duration::from_millis(15), move |_name| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        let _heart = watchdog.add_heart("sender");
        let handle = watchdog.start();

        thread::sleep(std::time::Duration::from_millis(80));
        handle.stop();

        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn beating_heart_never_fails() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let watchdog = Watchdog::new(Duration::from_millis(10), Duration::from_millis(50), move |_name| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        let heart = watchdog.add_heart("receiver");
        let handle = watchdog.start();

        for _ in 0..6 {
            thread::sleep(std::time::Duration::from_millis(15));
            heart.beat();
        }
        handle.stop();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
