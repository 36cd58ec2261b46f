pub mod cli;
pub mod ingest;
pub mod logging;
pub mod runtime;
pub mod sender;

pub use ingest::{EventIngestor, QueueTarget};
pub use runtime::{AgentRuntime, RuntimeError};
pub use sender::{SenderLoop, SinkSlot, TickOutcome};
