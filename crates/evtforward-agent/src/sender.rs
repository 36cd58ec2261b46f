use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use evtforward_batch::{BatchStatus, batch_events};
use evtforward_network::{Backoff, NetworkSink, PostOutcome};
use evtforward_pool::BufferPool;
use evtforward_queue::{BookmarkUpdate, MessageQueue};
use evtforward_watchdog::Heart;
use tracing::{info, warn};

use crate::ingest::QueueTarget;

/// Maximum time a sender-loop iteration parks waiting for new messages
/// before it re-checks the shutdown flag and re-heartbeats.
const MAX_IDLE_SLICE: StdDuration = StdDuration::from_secs(1);

/// One sink wired to the queue it drains and a scratch buffer sized for
/// its batches. One [`SenderLoop`] instance drives exactly one of these on
/// its own OS thread, one thread per sink.
pub struct SinkSlot {
    pub sink: Box<dyn NetworkSink>,
    pub target: QueueTarget,
    pub framing: Box<dyn evtforward_batch::Framing + Send + Sync>,
    pub max_msg_bytes: usize,
    pub max_batch: usize,
    batch_buf: Mutex<Vec<u8>>,
    backoff: Mutex<Backoff>,
}

impl SinkSlot {
    pub fn new(
        sink: Box<dyn NetworkSink>,
        target: QueueTarget,
        framing: Box<dyn evtforward_batch::Framing + Send + Sync>,
        max_msg_bytes: usize,
        max_batch: usize,
        batch_buf_size: usize,
    ) -> Self {
        Self {
            sink,
            target,
            framing,
            max_msg_bytes,
            max_batch,
            batch_buf: Mutex::new(vec![0u8; batch_buf_size]),
            backoff: Mutex::new(Backoff::new()),
        }
    }

    fn queue(&self) -> &MessageQueue {
        &self.target.queue
    }

    fn pool(&self) -> &BufferPool {
        &self.target.pool
    }
}

/// Outcome of one [`SenderLoop::run_once`] call against a single sink,
/// surfaced mainly for tests — the loop itself only needs it to decide
/// whether to honor backoff before the next iteration.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The queue was empty; nothing to do.
    Idle,
    /// Batcher returned a non-`Success` status; nothing changed.
    NothingToBatch(BatchStatus),
    /// Couldn't (re)connect; will retry next tick.
    ConnectFailed,
    /// Batch posted; this many messages were removed from the queue.
    Posted { messages_batched: usize, bookmarks: Vec<BookmarkUpdate> },
    /// Collector returned a transient error; queue unchanged, sink closed
    /// to force a reconnect.
    Transient(String),
    /// Collector rejected credentials; queue unchanged.
    FatalAuth(String),
}

type BookmarkSink = Arc<dyn Fn(&BookmarkUpdate) + Send + Sync>;

/// Sender loop: heartbeats, batches, posts, and on success removes
/// exactly what was batched from the head of the queue.
pub struct SenderLoop {
    slot: Arc<SinkSlot>,
    heart: Arc<Heart>,
    shutdown: Arc<AtomicBool>,
    halt_on_fatal_auth: bool,
    on_bookmark: Option<BookmarkSink>,
}

impl SenderLoop {
    pub fn new(slot: Arc<SinkSlot>, heart: Arc<Heart>, shutdown: Arc<AtomicBool>, halt_on_fatal_auth: bool) -> Self {
        Self { slot, heart, shutdown, halt_on_fatal_auth, on_bookmark: None }
    }

    /// Registers a callback invoked for every [`BookmarkUpdate`] surfaced by
    /// a successful post, so the caller can forward cursor commits to its
    /// bookmark store.
    pub fn with_bookmark_sink(mut self, on_bookmark: impl Fn(&BookmarkUpdate) + Send + Sync + 'static) -> Self {
        self.on_bookmark = Some(Arc::new(on_bookmark));
        self
    }

    /// Runs until `shutdown` is set, sleeping on the queue's condition
    /// variable between iterations: dequeue and wait-for-messages block on
    /// the queue's condvar until there's data or it begins draining.
    pub fn run(self) {
        info!("sender loop starting");
        loop {
            self.heart.beat();
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.slot.queue().wait_for_messages(MAX_IDLE_SLICE);
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.run_once() {
                TickOutcome::FatalAuth(message) => {
                    tracing::error!(%message, "collector rejected credentials");
                    if self.halt_on_fatal_auth {
                        warn!("halting sender loop after fatal auth error per policy");
                        break;
                    }
                }
                TickOutcome::Transient(message) => {
                    info!(%message, "transient post failure, will retry");
                }
                TickOutcome::Posted { bookmarks, .. } => {
                    if let Some(on_bookmark) = &self.on_bookmark {
                        for update in &bookmarks {
                            on_bookmark(update);
                        }
                    }
                }
                _ => {}
            }
        }
        info!("sender loop stopped");
    }

    /// One iteration of the batch/connect/post/commit cycle against this loop's
    /// single sink.
    pub fn run_once(&self) -> TickOutcome {
        let slot = &self.slot;
        if slot.queue().is_empty() {
            return TickOutcome::Idle;
        }

        let mut buf = slot.batch_buf.lock().expect("batch buffer mutex poisoned");
        let result = batch_events(slot.queue(), slot.pool(), slot.framing.as_ref(), &mut buf, slot.max_msg_bytes, slot.max_batch);

        if result.status != BatchStatus::Success {
            return TickOutcome::NothingToBatch(result.status);
        }

        if !slot.sink.is_connected() && !slot.sink.connect() {
            slot.backoff.lock().expect("backoff mutex poisoned").next_delay();
            return TickOutcome::ConnectFailed;
        }

        let outcome = slot.sink.post(&buf[..result.bytes_written]);
        drop(buf);

        match outcome {
            PostOutcome::Success => {
                slot.backoff.lock().expect("backoff mutex poisoned").reset();
                let mut bookmarks = Vec::new();
                for _ in 0..result.messages_batched {
                    if let Some(message) = slot.queue().remove_front() {
                        crate::ingest::EventIngestor::release(slot.pool(), &message);
                        if let Some(bookmark) = message.bookmark {
                            bookmarks.push(bookmark);
                        }
                    }
                }
                TickOutcome::Posted { messages_batched: result.messages_batched, bookmarks }
            }
            PostOutcome::Transient(message) => {
                slot.sink.close();
                slot.backoff.lock().expect("backoff mutex poisoned").next_delay();
                TickOutcome::Transient(message)
            }
            PostOutcome::FatalAuth(message) => TickOutcome::FatalAuth(message),
        }
    }
}
