use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message of {len} bytes exceeds the {max}-byte limit")]
    MessageTooLarge { len: usize, max: usize },

    #[error("message spans {count} buffers, more than the {max} allowed")]
    TooManyBuffers { count: usize, max: usize },

    #[error("queue is shutting down, no further messages are accepted")]
    ShuttingDown,

    #[error("enqueue cancelled by registered pre-enqueue hook")]
    CancelledByHook,
}
