use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use chrono::Utc;

use crate::record::RenderedEvent;
use crate::severity::Severity;
use crate::subscription::PlatformEventSource;

/// One line handed off by the File Tail Watcher collaborator — it
/// produces lines and invokes a caller-supplied enqueue function with the
/// program name from config.
#[derive(Clone, Debug)]
pub struct TailLine {
    pub seq: u64,
    pub text: String,
}

/// Feed end of a tailed file: owns the sequence counter and the sender
/// half of the channel the real watcher thread (out of scope here)
/// would push lines into. Also stands in for the platform's own
/// callback thread in tests, since both ultimately look like "events
/// arrive asynchronously on some other thread and need delivering through
/// [`crate::subscription::Subscription`]".
pub struct TailFeed {
    next_seq: AtomicU64,
    sender: Sender<TailLine>,
}

impl TailFeed {
    pub fn new() -> (Self, Receiver<TailLine>) {
        let (sender, receiver) = mpsc::channel();
        (Self { next_seq: AtomicU64::new(1), sender }, receiver)
    }

    /// Pushes one tailed line, stamping it with the next sequence number.
    /// Returns `false` if the receiving end has been dropped (watcher
    /// shut down).
    pub fn push_line(&self, text: impl Into<String>) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.sender.send(TailLine { seq, text: text.into() }).is_ok()
    }
}

/// Drains whatever lines are currently queued on `receiver`, waiting up to
/// `timeout` for the first one. Mirrors the bounded wait the real platform
/// callback thread would have before handing control back to the caller.
pub fn drain_available(receiver: &Receiver<TailLine>, timeout: Duration) -> Vec<TailLine> {
    let mut lines = Vec::new();
    if let Ok(first) = receiver.recv_timeout(timeout) {
        lines.push(first);
        while let Ok(next) = receiver.try_recv() {
            lines.push(next);
        }
    }
    lines
}

/// [`PlatformEventSource`] over a tailed text file: the "cursor" is just
/// the sequence number of the last line delivered, and every line renders
/// to a single-field event under `program_name` (the tail config's
/// program-name override).
pub struct ChannelEventSource {
    program_name: String,
    host: String,
}

impl ChannelEventSource {
    pub fn new(program_name: impl Into<String>, host: impl Into<String>) -> Self {
        Self { program_name: program_name.into(), host: host.into() }
    }
}

impl PlatformEventSource for ChannelEventSource {
    type Cursor = u64;
    type Event = TailLine;

    fn create_cursor(&self, token: Option<&str>) -> u64 {
        token.and_then(|t| t.parse().ok()).unwrap_or(0)
    }

    fn render_cursor(&self, cursor: &u64) -> String {
        cursor.to_string()
    }

    fn advance_cursor(&self, cursor: &mut u64, event: &TailLine) -> bool {
        if event.seq <= *cursor {
            return false;
        }
        *cursor = event.seq;
        true
    }

    fn render_event(&self, event: &TailLine) -> RenderedEvent {
        RenderedEvent {
            host: self.host.clone(),
            provider: self.program_name.clone(),
            severity: Severity::Informational,
            facility: 1,
            source_type: "tail".into(),
            source_tag: self.program_name.clone(),
            log_type: "file".into(),
            event_id: 0,
            event_log: self.program_name.clone(),
            message: Some(event.text.clone()),
            timestamp: Utc::now(),
            event_data: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{BookmarkStore, Subscription};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryBookmarks(RefCell<HashMap<String, String>>);

    impl BookmarkStore for MemoryBookmarks {
        fn read_bookmark(&self, channel: &str) -> Option<String> {
            self.0.borrow().get(channel).cloned()
        }
        fn write_bookmark(&self, channel: &str, token: &str) {
            self.0.borrow_mut().insert(channel.to_string(), token.to_string());
        }
    }

    #[test]
    fn tailed_lines_deliver_in_order_and_advance_cursor() {
        let (feed, receiver) = TailFeed::new();
        feed.push_line("first line");
        feed.push_line("second line");

        let lines = drain_available(&receiver, Duration::from_millis(50));
        assert_eq!(lines.len(), 2);

        let source = ChannelEventSource::new("myapp", "host01");
        let mut sub = Subscription::new("myapp.log", source);
        sub.subscribe(None);
        for line in &lines {
            sub.deliver(line, |_| true);
        }

        let bookmarks = MemoryBookmarks::default();
        sub.cancel(&bookmarks);
        assert_eq!(bookmarks.read_bookmark("myapp.log"), Some("2".to_string()));
    }

    #[test]
    fn stale_line_does_not_move_cursor_backwards() {
        let source = ChannelEventSource::new("myapp", "host01");
        let mut cursor = 5u64;
        let moved = source.advance_cursor(&mut cursor, &TailLine { seq: 3, text: "late arrival".into() });
        assert!(!moved);
        assert_eq!(cursor, 5);
    }

    #[test]
    fn drain_available_returns_empty_after_timeout_with_no_lines() {
        let (_feed, receiver) = TailFeed::new();
        let lines = drain_available(&receiver, Duration::from_millis(20));
        assert!(lines.is_empty());
    }
}
