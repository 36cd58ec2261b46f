use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::bitmap::Bitmap;

/// Opaque handle to a pooled buffer: `(chunk index, bit index)`.
///
/// An integer pair rather than a smart pointer, so the pool stays the sole
/// owner of the backing memory and a released handle can be detected as
/// stale (`is_lent` returns `false`) instead of dangling.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    chunk: u32,
    bit: u32,
}

/// Whether a pool releases memory back to the allocator when chunks above
/// the current one go fully idle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolPolicy {
    NeverShrink,
    /// Shrink once a chunk's free fraction reaches at least this percent
    /// (0..=100) *and* every chunk above it is entirely free.
    ShrinkAtSlack(u8),
}

struct Chunk {
    bitmap: Bitmap,
    buffers: Vec<Box<[u8]>>,
}

impl Chunk {
    fn new(chunk_size: usize, buffer_size: usize) -> Self {
        Self {
            bitmap: Bitmap::new(chunk_size),
            buffers: (0..chunk_size).map(|_| vec![0u8; buffer_size].into_boxed_slice()).collect(),
        }
    }
}

struct PoolState {
    chunks: Vec<Chunk>,
}

/// Chunked, bitmap-indexed allocator of fixed-size buffers. Grows by
/// appending whole chunks; may shrink trailing chunks back off under
/// [`PoolPolicy::ShrinkAtSlack`].
pub struct BufferPool {
    buffer_size: usize,
    chunk_size: usize,
    policy: PoolPolicy,
    state: Mutex<PoolState>,
    lent: AtomicUsize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, chunk_size: usize, policy: PoolPolicy) -> Self {
        assert!(buffer_size > 0, "buffer_size must be > 0");
        assert!(chunk_size > 0, "chunk_size must be > 0");
        Self {
            buffer_size,
            chunk_size,
            policy,
            state: Mutex::new(PoolState { chunks: Vec::new() }),
            lent: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Acquires a free buffer, growing the pool by one chunk if every
    /// existing chunk is full. Returns `None` only if chunk growth itself
    /// fails (out of memory).
    pub fn acquire(&self) -> Option<BufferHandle> {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        for (idx, chunk) in state.chunks.iter_mut().enumerate() {
            if let Some(bit) = chunk.bitmap.get_and_set_first_zero() {
                self.lent.fetch_add(1, Ordering::AcqRel);
                return Some(BufferHandle { chunk: idx as u32, bit: bit as u32 });
            }
        }

        let mut new_chunk = Chunk::new(self.chunk_size, self.buffer_size);
        let bit = new_chunk.bitmap.get_and_set_first_zero()?;
        state.chunks.push(new_chunk);
        self.lent.fetch_add(1, Ordering::AcqRel);
        Some(BufferHandle { chunk: (state.chunks.len() - 1) as u32, bit: bit as u32 })
    }

    /// Releases a previously acquired buffer. Returns `false` for an
    /// invalid handle or a double-release rather than panicking.
    pub fn release(&self, handle: BufferHandle) -> bool {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let chunk_idx = handle.chunk as usize;
        let Some(chunk) = state.chunks.get_mut(chunk_idx) else {
            warn!(?handle, "release of buffer in unknown chunk");
            return false;
        };
        let bit = handle.bit as usize;
        if bit >= chunk.bitmap.len() || !chunk.bitmap.is_set(bit) {
            warn!(?handle, "double-release or invalid buffer handle");
            return false;
        }
        chunk.bitmap.clear(bit);
        self.lent.fetch_sub(1, Ordering::AcqRel);

        self.maybe_shrink(&mut state);
        true
    }

    /// Truncates trailing chunks once they're all fully free and the last
    /// chunk still holding any lent buffer has free fraction `>= slack`.
    /// Re-evaluated from scratch on every release, since which chunk just
    /// went idle doesn't matter: a release anywhere can make an unrelated
    /// run of trailing chunks eligible for truncation.
    fn maybe_shrink(&self, state: &mut PoolState) {
        let PoolPolicy::ShrinkAtSlack(slack_percent) = self.policy else { return };

        let boundary = state.chunks.iter().rposition(|c| c.bitmap.count_ones() > 0);
        let Some(boundary) = boundary else {
            // Nothing lent anywhere; collapse back to a single chunk.
            state.chunks.truncate(1);
            return;
        };

        if boundary + 1 >= state.chunks.len() {
            // The last lent buffer is already in the last chunk; no trailing
            // chunks to trim.
            return;
        }
        let chunk = &state.chunks[boundary];
        let slack_ratio = (chunk.bitmap.count_zeroes() * 100) / chunk.bitmap.len();
        if slack_ratio >= slack_percent as usize {
            state.chunks.truncate(boundary + 1);
        }
    }

    #[inline]
    pub fn is_lent(&self, handle: BufferHandle) -> bool {
        let state = self.state.lock().expect("pool mutex poisoned");
        state
            .chunks
            .get(handle.chunk as usize)
            .is_some_and(|c| (handle.bit as usize) < c.bitmap.len() && c.bitmap.is_set(handle.bit as usize))
    }

    #[inline]
    pub fn lent_count(&self) -> usize {
        self.lent.load(Ordering::Acquire)
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().expect("pool mutex poisoned").chunks.len()
    }

    /// Copies `data` into the lent buffer identified by `handle`. `data`
    /// must not exceed `buffer_size`. Returns `false` for a stale handle.
    pub fn write(&self, handle: BufferHandle, data: &[u8]) -> bool {
        debug_assert!(data.len() <= self.buffer_size);
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let Some(chunk) = state.chunks.get_mut(handle.chunk as usize) else { return false };
        let bit = handle.bit as usize;
        if bit >= chunk.bitmap.len() || !chunk.bitmap.is_set(bit) {
            return false;
        }
        chunk.buffers[bit][..data.len()].copy_from_slice(data);
        true
    }

    /// Copies the first `len` bytes out of the lent buffer identified by
    /// `handle` into `out`. Returns `false` for a stale handle.
    pub fn read_into(&self, handle: BufferHandle, len: usize, out: &mut [u8]) -> bool {
        debug_assert!(len <= out.len());
        let state = self.state.lock().expect("pool mutex poisoned");
        let Some(chunk) = state.chunks.get(handle.chunk as usize) else { return false };
        let bit = handle.bit as usize;
        if bit >= chunk.bitmap.len() || !chunk.bitmap.is_set(bit) {
            return false;
        }
        out[..len].copy_from_slice(&chunk.buffers[bit][..len]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_grows_in_chunks() {
        let pool = BufferPool::new(64, 4, PoolPolicy::NeverShrink);
        let mut handles = Vec::new();
        for _ in 0..10 {
            handles.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.lent_count(), 10);
        assert_eq!(pool.chunk_count(), 3); // ceil(10/4)
    }

    #[test]
    fn release_invalid_handle_fails() {
        let pool = BufferPool::new(64, 4, PoolPolicy::NeverShrink);
        let h = pool.acquire().unwrap();
        assert!(pool.release(h));
        assert!(!pool.release(h), "double release must fail");
    }

    #[test]
    fn shrink_truncates_trailing_empty_chunks() {
        let pool = BufferPool::new(8, 2, PoolPolicy::ShrinkAtSlack(50));
        let handles: Vec<_> = (0..6).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.chunk_count(), 3);
        // Free everything but handles[0]: chunk 0 drops to 50% free (right
        // at the slack threshold) while chunks 1 and 2 go fully idle, so
        // both trailing chunks are dropped.
        for h in &handles[1..] {
            pool.release(*h);
        }
        assert_eq!(pool.chunk_count(), 1);
        assert!(pool.is_lent(handles[0]));
    }

    #[test]
    fn shrink_keeps_chunk_below_slack_threshold() {
        let pool = BufferPool::new(8, 2, PoolPolicy::ShrinkAtSlack(50));
        let handles: Vec<_> = (0..6).map(|_| pool.acquire().unwrap()).collect();
        // Chunk 0 stays fully lent; only the trailing chunks go idle. Its
        // free fraction is 0%, below the slack threshold, so nothing shrinks.
        for h in &handles[2..] {
            pool.release(*h);
        }
        assert_eq!(pool.chunk_count(), 3);
    }

    #[test]
    fn never_shrink_keeps_chunks() {
        let pool = BufferPool::new(8, 2, PoolPolicy::NeverShrink);
        let handles: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        for h in &handles {
            pool.release(*h);
        }
        assert_eq!(pool.chunk_count(), 2);
    }

    #[test]
    fn lent_count_matches_acquire_release() {
        let pool = BufferPool::new(16, 8, PoolPolicy::NeverShrink);
        let mut live = Vec::new();
        for _ in 0..20 {
            live.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.lent_count(), 20);
        for h in live.drain(..10) {
            assert!(pool.release(h));
        }
        assert_eq!(pool.lent_count(), 10);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let pool = BufferPool::new(16, 4, PoolPolicy::NeverShrink);
        let h = pool.acquire().unwrap();
        assert!(pool.write(h, b"hello"));
        let mut out = [0u8; 5];
        assert!(pool.read_into(h, 5, &mut out));
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn concurrent_acquire_release_never_double_lends() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(BufferPool::new(32, 16, PoolPolicy::NeverShrink));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                let mut local = Vec::new();
                for _ in 0..200 {
                    local.push(pool.acquire().unwrap());
                }
                for h in local {
                    assert!(pool.release(h));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.lent_count(), 0);
    }
}
