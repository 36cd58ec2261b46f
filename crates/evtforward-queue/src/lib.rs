mod error;
mod message;
mod queue;

pub use error::QueueError;
pub use message::{BookmarkUpdate, Message, MessageBuffer};
pub use queue::MessageQueue;
