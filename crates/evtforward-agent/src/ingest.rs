use std::sync::Arc;

use evtforward_batch::Framing;
use evtforward_events::{RenderedEvent, build_record};
use evtforward_pool::BufferPool;
use evtforward_queue::{BookmarkUpdate, Message, MessageBuffer, MessageQueue};
use tracing::{trace, warn};

/// One queue a rendered event can land in: its own buffer pool and the
/// framing its sender loop will batch with. A secondary queue with a
/// different framing gets its own record regenerated for it.
pub struct QueueTarget {
    pub queue: Arc<MessageQueue>,
    pub pool: Arc<BufferPool>,
    pub http_framing: bool,
}

impl QueueTarget {
    pub fn new(queue: Arc<MessageQueue>, pool: Arc<BufferPool>, http_framing: bool) -> Self {
        Self { queue, pool, http_framing }
    }
}

/// Turns a [`RenderedEvent`] into JSON bytes sized
/// against each target's buffer pool, and enqueues the result into one or
/// two queues.
pub struct EventIngestor {
    pub primary: QueueTarget,
    pub secondary: Option<QueueTarget>,
    /// Upper bound on how many pool buffers one message may span.
    pub max_buffers_per_message: usize,
}

impl EventIngestor {
    pub fn new(primary: QueueTarget, secondary: Option<QueueTarget>, max_buffers_per_message: usize) -> Self {
        Self { primary, secondary, max_buffers_per_message }
    }

    /// Renders and enqueues `event` into the primary queue (carrying
    /// `bookmark`, so the sender loop can persist it once the primary
    /// batch is acknowledged) and, if configured, the secondary queue
    /// (best-effort, no bookmark attached — replication to a secondary
    /// collector never gates cursor advancement).
    ///
    /// Returns whether the primary enqueue succeeded; a caller using this
    /// as the handler passed to `Subscription::deliver` should treat that
    /// as the event's accept/reject verdict.
    pub fn ingest(&self, bookmark: Option<BookmarkUpdate>, event: &RenderedEvent) -> bool {
        let primary_ok = Self::ingest_one(&self.primary, bookmark, event, self.max_buffers_per_message);
        if let Some(secondary) = &self.secondary {
            Self::ingest_one(secondary, None, event, self.max_buffers_per_message);
        }
        primary_ok
    }

    fn ingest_one(target: &QueueTarget, bookmark: Option<BookmarkUpdate>, event: &RenderedEvent, max_buffers: usize) -> bool {
        let target_buffer = target.pool.buffer_size() * max_buffers;
        let Some((policy, bytes)) = build_record(event, target_buffer, target.http_framing) else {
            warn!(event_id = event.event_id, "dropping event: record too large even at minimum sizing");
            return false;
        };
        trace!(event_id = event.event_id, ?policy, bytes = bytes.len(), "built event record");

        let Some(buffers) = Self::acquire_buffers(&target.pool, &bytes, max_buffers) else {
            warn!(event_id = event.event_id, "dropping event: buffer pool exhausted or message spans too many buffers");
            return false;
        };

        let message = Message::new(buffers.clone(), bookmark);
        match target.queue.enqueue(message) {
            Ok(Some(dropped)) => {
                Self::release(&target.pool, &dropped);
                true
            }
            Ok(None) => true,
            Err(err) => {
                warn!(event_id = event.event_id, error = %err, "enqueue rejected, releasing acquired buffers");
                for buf in &buffers {
                    target.pool.release(buf.handle);
                }
                false
            }
        }
    }

    fn acquire_buffers(pool: &BufferPool, bytes: &[u8], max_buffers: usize) -> Option<Vec<MessageBuffer>> {
        let chunk_size = pool.buffer_size();
        let chunks: Vec<&[u8]> = bytes.chunks(chunk_size.max(1)).collect();
        if chunks.is_empty() || chunks.len() > max_buffers {
            return None;
        }

        let mut buffers = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let Some(handle) = pool.acquire() else {
                for buf in &buffers {
                    pool.release(buf.handle);
                }
                return None;
            };
            pool.write(handle, chunk);
            buffers.push(MessageBuffer { handle, len: chunk.len() });
        }
        Some(buffers)
    }

    /// Releases every buffer backing `message`, called whenever a message
    /// leaves the queue without ever being posted (drop-oldest-on-full or
    /// a rejected enqueue).
    pub fn release(pool: &BufferPool, message: &Message) {
        for buf in message.buffers() {
            pool.release(buf.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use evtforward_pool::PoolPolicy;
    use evtforward_events::Severity;

    fn sample_event() -> RenderedEvent {
        RenderedEvent {
            host: "host01".into(),
            provider: "sshd".into(),
            severity: Severity::Error,
            facility: 1,
            source_type: "eventlog".into(),
            source_tag: "security".into(),
            log_type: "Security".into(),
            event_id: 4625,
            event_log: "Security".into(),
            message: Some("failed login".into()),
            timestamp: DateTime::<Utc>::MIN_UTC,
            event_data: vec![("user".into(), "alice".into())],
        }
    }

    fn target() -> QueueTarget {
        let pool = Arc::new(BufferPool::new(256, 8, PoolPolicy::NeverShrink));
        let queue = Arc::new(MessageQueue::new(10, 8192, 8));
        QueueTarget::new(queue, pool, true)
    }

    #[test]
    fn ingest_enqueues_into_primary_and_secondary() {
        let ingestor = EventIngestor::new(target(), Some(target()), 8);
        let ok = ingestor.ingest(Some(BookmarkUpdate { channel: "Security".into(), token: "1".into() }), &sample_event());
        assert!(ok);
        assert_eq!(ingestor.primary.queue.len(), 1);
        assert_eq!(ingestor.secondary.as_ref().unwrap().queue.len(), 1);
    }

    #[test]
    fn secondary_message_carries_no_bookmark() {
        let ingestor = EventIngestor::new(target(), Some(target()), 8);
        ingestor.ingest(Some(BookmarkUpdate { channel: "Security".into(), token: "1".into() }), &sample_event());
        let secondary_msg = ingestor.secondary.as_ref().unwrap().queue.peek_front().unwrap();
        assert!(secondary_msg.bookmark.is_none());
        let primary_msg = ingestor.primary.queue.peek_front().unwrap();
        assert_eq!(primary_msg.bookmark.as_ref().unwrap().token, "1");
    }

    #[test]
    fn oversized_record_is_dropped_without_touching_the_pool() {
        let pool = Arc::new(BufferPool::new(4, 1, PoolPolicy::NeverShrink));
        let queue = Arc::new(MessageQueue::new(10, 8192, 1));
        let target = QueueTarget::new(queue, pool.clone(), true);
        let ingestor = EventIngestor::new(target, None, 1);

        let ok = ingestor.ingest(None, &sample_event());
        assert!(!ok, "a record bigger than one 4-byte buffer with max_buffers=1 must be dropped");
        assert_eq!(pool.lent_count(), 0);
    }
}
