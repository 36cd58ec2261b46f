use evtforward_pool::BufferPool;
use evtforward_queue::MessageQueue;
use tracing::warn;

use crate::framing::Framing;

/// Minimum margin the buffer-size pre-check demands beyond header+trailer,
/// so at least one byte of message content is always possible.
const MIN_BUFFER_MARGIN: usize = 1;

/// Extra slack reserved per message beyond header/separator/trailer when
/// deciding whether it still fits. Mirrors the original sender's
/// `space_needed += trailer_size + 16`, which reserves room for the
/// trailer with a safety margin rather than sizing to the byte.
const SAFETY_MARGIN: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
    /// The queue was empty; nothing to batch.
    NoMessages,
    /// Not even one message fits alongside header and trailer.
    BufferTooSmall,
    /// The caller-supplied buffer was null-sized or otherwise unusable.
    InvalidBuffer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub messages_batched: usize,
    pub bytes_written: usize,
}

impl BatchResult {
    fn empty(status: BatchStatus) -> Self {
        Self { status, messages_batched: 0, bytes_written: 0 }
    }
}

/// Packs a prefix of `queue` into `out` using `framing`, without ever
/// removing anything from the queue. The caller (sender loop) removes
/// exactly `messages_batched` messages from the head only once the batch
/// has been durably posted.
///
/// `max_msg_bytes` and `max_batch` bound a single oversized message and the
/// number of messages packed into one call respectively; both are a second
/// line of defense behind the queue's own admission checks.
pub fn batch_events(
    queue: &MessageQueue,
    pool: &BufferPool,
    framing: &dyn Framing,
    out: &mut [u8],
    max_msg_bytes: usize,
    max_batch: usize,
) -> BatchResult {
    if out.is_empty() {
        return BatchResult::empty(BatchStatus::InvalidBuffer);
    }

    let header = framing.header();
    let separator = framing.separator();
    let trailer = framing.trailer();

    if out.len() < header.len() + trailer.len() + MIN_BUFFER_MARGIN {
        return BatchResult::empty(BatchStatus::BufferTooSmall);
    }

    let mut snapshot = Vec::new();
    queue.traverse(|message| snapshot.push(message.clone()));
    if snapshot.is_empty() {
        return BatchResult::empty(BatchStatus::NoMessages);
    }

    out[..header.len()].copy_from_slice(header);
    let mut cursor = header.len();
    let mut batched = 0usize;
    let mut saw_oversized = false;

    for message in &snapshot {
        if batched >= max_batch {
            break;
        }

        let len = message.total_len();
        if len == 0 {
            warn!("skipping zero-length message while batching");
            continue;
        }
        if len > max_msg_bytes {
            warn!(len, max_msg_bytes, "skipping oversized message while batching");
            saw_oversized = true;
            continue;
        }

        let sep_len = if batched > 0 { separator.len() } else { 0 };
        let need = len + sep_len + trailer.len() + SAFETY_MARGIN;

        if cursor + need > out.len() {
            if batched == 0 {
                return BatchResult::empty(BatchStatus::BufferTooSmall);
            }
            break;
        }

        if batched > 0 {
            out[cursor..cursor + separator.len()].copy_from_slice(separator);
            cursor += separator.len();
        }

        for buf in message.buffers() {
            if !pool.read_into(buf.handle, buf.len, &mut out[cursor..cursor + buf.len]) {
                warn!("stale buffer handle while batching, message bytes may be truncated");
            }
            cursor += buf.len;
        }
        batched += 1;
    }

    if batched == 0 {
        return BatchResult::empty(if saw_oversized { BatchStatus::BufferTooSmall } else { BatchStatus::NoMessages });
    }

    out[cursor..cursor + trailer.len()].copy_from_slice(trailer);
    cursor += trailer.len();

    BatchResult { status: BatchStatus::Success, messages_batched: batched, bytes_written: cursor }
}
