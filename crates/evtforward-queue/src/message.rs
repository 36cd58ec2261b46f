use evtforward_pool::BufferHandle;
use evtforward_timing::Instant;

/// One buffer's worth of a message's bytes: the pool handle plus how many
/// of the buffer's bytes are actually in use (a buffer is rarely filled to
/// capacity).
#[derive(Clone, Copy, Debug)]
pub struct MessageBuffer {
    pub handle: BufferHandle,
    pub len: usize,
}

/// The channel cursor a message carries along with it, persisted only
/// once the message's batch has been durably posted (a
/// bookmark token is only written after the event it represents has been
/// handed to the queue *and* its batch has been acknowledged).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookmarkUpdate {
    pub channel: String,
    pub token: String,
}

/// A queued event: the pool buffers holding its serialized bytes, plus the
/// bookkeeping the batcher and sender loop need without touching the pool
/// again.
///
/// Mirrors the original `Message`/`MessageBuffer` pair, except the buffer
/// list lives in a `Vec` instead of an intrusive linked list — the pool
/// already owns buffer storage, so the queue only needs to remember which
/// handles belong together, in what order, and how many bytes of each are
/// live.
#[derive(Clone, Debug)]
pub struct Message {
    buffers: Vec<MessageBuffer>,
    total_len: usize,
    enqueued_at: Instant,
    /// Channel + opaque cursor from the originating subscription, replayed
    /// back to it once this message's batch is durably posted.
    pub bookmark: Option<BookmarkUpdate>,
}

impl Message {
    pub fn new(buffers: Vec<MessageBuffer>, bookmark: Option<BookmarkUpdate>) -> Self {
        let total_len = buffers.iter().map(|b| b.len).sum();
        Self { buffers, total_len, enqueued_at: Instant::now(), bookmark }
    }

    #[inline]
    pub fn buffers(&self) -> &[MessageBuffer] {
        &self.buffers
    }

    #[inline]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}
