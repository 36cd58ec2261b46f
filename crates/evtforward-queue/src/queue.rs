use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration as StdDuration;

use evtforward_timing::Instant;
use tracing::warn;

use crate::error::QueueError;
use crate::message::Message;

/// Called under the queue's lock just before a message would be inserted.
/// Returning `false` cancels that enqueue cleanly — nothing is inserted,
/// nothing is dropped to make room for it.
type EnqueueHook = Box<dyn Fn(&Message) -> bool + Send + Sync>;

struct Inner {
    messages: VecDeque<Message>,
    draining: bool,
}

/// Bounded FIFO of [`Message`]s shared between however many subscriptions
/// feed it and the one sender-loop thread that drains it.
///
/// Mirrors the original `MessageQueue`: a mutex-guarded deque plus a
/// condition variable so `dequeue`/`wait_for_messages` park instead of
/// spinning, and a `draining` flag so a shutdown in progress wakes every
/// waiter instead of leaving them blocked forever.
pub struct MessageQueue {
    max_queued: usize,
    max_msg_bytes: usize,
    max_buffers_per_message: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    enqueue_hook: Option<EnqueueHook>,
}

impl MessageQueue {
    pub fn new(max_queued: usize, max_msg_bytes: usize, max_buffers_per_message: usize) -> Self {
        Self {
            max_queued,
            max_msg_bytes,
            max_buffers_per_message,
            inner: Mutex::new(Inner { messages: VecDeque::with_capacity(max_queued), draining: false }),
            not_empty: Condvar::new(),
            enqueue_hook: None,
        }
    }

    /// Installs a callback invoked, under the queue's lock, just before a
    /// message would be inserted. Returning `false` cancels that enqueue
    /// cleanly: nothing is inserted and nothing else is dropped to make
    /// room for it.
    pub fn set_enqueue_hook(&mut self, hook: impl Fn(&Message) -> bool + Send + Sync + 'static) {
        self.enqueue_hook = Some(Box::new(hook));
    }

    /// Validates, then appends `message`. If the queue is at capacity, the
    /// oldest message is removed first (drop-oldest-on-full) rather than
    /// rejecting the new one or blocking the caller.
    ///
    /// Returns `Ok(None)` if the message was accepted with nothing dropped,
    /// `Ok(Some(dropped))` if accepted but it evicted the previous head, or
    /// `Err(QueueError::CancelledByHook)` if a pre-enqueue hook rejected it.
    pub fn enqueue(&self, message: Message) -> Result<Option<Message>, QueueError> {
        if message.total_len() > self.max_msg_bytes {
            return Err(QueueError::MessageTooLarge { len: message.total_len(), max: self.max_msg_bytes });
        }
        if message.buffer_count() > self.max_buffers_per_message {
            return Err(QueueError::TooManyBuffers { count: message.buffer_count(), max: self.max_buffers_per_message });
        }

        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.draining {
            return Err(QueueError::ShuttingDown);
        }

        if let Some(hook) = &self.enqueue_hook {
            if !hook(&message) {
                return Err(QueueError::CancelledByHook);
            }
        }

        let dropped = if inner.messages.len() >= self.max_queued {
            let dropped = inner.messages.pop_front();
            warn!("queue at capacity, dropped oldest message");
            dropped
        } else {
            None
        };

        inner.messages.push_back(message);
        drop(inner);
        self.not_empty.notify_one();
        Ok(dropped)
    }

    /// Returns a clone of the oldest message without removing it, so the
    /// batcher can read the queue without taking ownership.
    pub fn peek_front(&self) -> Option<Message> {
        self.inner.lock().expect("queue mutex poisoned").messages.front().cloned()
    }

    /// Removes and returns the oldest message, called once its batch has
    /// been durably posted.
    pub fn remove_front(&self) -> Option<Message> {
        self.inner.lock().expect("queue mutex poisoned").messages.pop_front()
    }

    /// Blocks until at least one message is queued or the queue begins
    /// draining with nothing left, then returns a snapshot of the current
    /// front (or `None` if draining and empty).
    pub fn wait_for_messages(&self, timeout: StdDuration) -> Option<Message> {
        let guard = self.inner.lock().expect("queue mutex poisoned");
        let (guard, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |inner| inner.messages.is_empty() && !inner.draining)
            .expect("queue mutex poisoned");
        guard.messages.front().cloned()
    }

    /// Runs `f` over a consistent snapshot of the queue taken under lock,
    /// without holding the lock for the duration of `f` itself.
    pub fn traverse(&self, mut f: impl FnMut(&Message)) {
        let snapshot: Vec<Message> = {
            let inner = self.inner.lock().expect("queue mutex poisoned");
            inner.messages.iter().cloned().collect()
        };
        for message in &snapshot {
            f(message);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").draining
    }

    /// Marks the queue as draining and wakes every blocked waiter. Already
    /// queued messages remain until removed; no new message is accepted.
    pub fn begin_shutdown(&self) {
        self.inner.lock().expect("queue mutex poisoned").draining = true;
        self.not_empty.notify_all();
    }

    pub fn oldest_timestamp(&self) -> Option<Instant> {
        self.inner.lock().expect("queue mutex poisoned").messages.front().map(Message::enqueued_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuffer;
    use evtforward_pool::BufferHandle;

    fn msg(len: usize) -> Message {
        Message::new(vec![MessageBuffer { handle: BufferHandle::default(), len }], None)
    }

    #[test]
    fn fifo_order_preserved() {
        let q = MessageQueue::new(10, 1024, 32);
        q.enqueue(msg(10)).unwrap();
        q.enqueue(msg(20)).unwrap();
        assert_eq!(q.peek_front().unwrap().total_len(), 10);
        q.remove_front();
        assert_eq!(q.peek_front().unwrap().total_len(), 20);
    }

    #[test]
    fn rejects_oversized_message() {
        let q = MessageQueue::new(10, 100, 32);
        let err = q.enqueue(msg(200)).unwrap_err();
        assert!(matches!(err, QueueError::MessageTooLarge { .. }));
    }

    #[test]
    fn drop_oldest_on_full() {
        let q = MessageQueue::new(2, 1024, 32);
        q.enqueue(msg(1)).unwrap();
        q.enqueue(msg(2)).unwrap();
        let dropped = q.enqueue(msg(3)).unwrap();
        assert_eq!(dropped.unwrap().total_len(), 1);
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_front().unwrap().total_len(), 2);
    }

    #[test]
    fn shutdown_rejects_new_enqueues_but_keeps_backlog() {
        let q = MessageQueue::new(10, 1024, 32);
        q.enqueue(msg(1)).unwrap();
        q.begin_shutdown();
        assert!(matches!(q.enqueue(msg(2)), Err(QueueError::ShuttingDown)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn wait_for_messages_returns_immediately_when_nonempty() {
        let q = MessageQueue::new(10, 1024, 32);
        q.enqueue(msg(5)).unwrap();
        let got = q.wait_for_messages(StdDuration::from_millis(10));
        assert_eq!(got.unwrap().total_len(), 5);
    }

    #[test]
    fn wait_for_messages_wakes_on_shutdown_when_empty() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(MessageQueue::new(10, 1024, 32));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.wait_for_messages(StdDuration::from_secs(5)));
        thread::sleep(StdDuration::from_millis(20));
        q.begin_shutdown();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn enqueue_hook_fires_before_each_accepted_insert() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let mut q = MessageQueue::new(10, 1024, 32);
        let count2 = count.clone();
        q.set_enqueue_hook(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
            true
        });
        q.enqueue(msg(1)).unwrap();
        q.enqueue(msg(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn enqueue_hook_returning_false_cancels_cleanly() {
        let mut q = MessageQueue::new(10, 1024, 32);
        q.set_enqueue_hook(|m| m.total_len() < 100);
        q.enqueue(msg(5)).unwrap();
        let err = q.enqueue(msg(500)).unwrap_err();
        assert!(matches!(err, QueueError::CancelledByHook));
        assert_eq!(q.len(), 1, "the cancelled message was never inserted");
    }
}
