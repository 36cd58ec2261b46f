mod batcher;
mod framing;

pub use batcher::{BatchResult, BatchStatus, batch_events};
pub use framing::{Framing, HttpJsonFraming, NdjsonFraming};
