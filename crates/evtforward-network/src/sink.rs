use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("sink not connected")]
    NotConnected,
}

/// Outcome of one `post`, the "status triple" spec'd for the network sink:
/// whether it succeeded, and if not, whether retrying the same bytes is
/// worthwhile (`Transient`) or pointless until the operator intervenes
/// (`FatalAuth`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Success,
    Transient(String),
    FatalAuth(String),
}

impl PostOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PostOutcome::Success)
    }
}

/// One collector endpoint. `connect`/`post`/`close` mirror the original
/// `INetworkClient` contract; a sum-type of concrete sinks (see
/// [`crate::HttpSink`], [`crate::TcpSink`]) stands in for the inheritance
/// hierarchy the original used for polymorphism over network sinks.
///
/// A sink is driven exclusively by the single sender-loop thread that owns
/// it, so implementations use a plain `Mutex` rather than the recursive
/// mutex the original calls for (see DESIGN.md).
pub trait NetworkSink: Send {
    /// Opens (or re-opens) the underlying connection. Returns `false` if
    /// the attempt failed; the caller retries on a later sender-loop tick.
    fn connect(&self) -> bool;

    /// Whether the sink believes it currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Sends `bytes` as the full batch body.
    fn post(&self, bytes: &[u8]) -> PostOutcome;

    /// Tears down the connection. Idempotent.
    fn close(&self);

    /// Best-effort capability probe; `None` if the collector didn't answer
    /// or the sink doesn't support it.
    fn get_collector_version(&self) -> Option<String>;
}
