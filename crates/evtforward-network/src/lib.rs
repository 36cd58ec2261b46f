mod backoff;
mod http;
mod sink;
mod tcp;

pub use backoff::Backoff;
pub use http::{HttpSink, HttpSinkConfig};
pub use sink::{NetworkSink, PostOutcome, SinkError};
pub use tcp::{TcpSink, TcpSinkConfig};
