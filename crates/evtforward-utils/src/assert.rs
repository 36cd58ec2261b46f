/// Panics in debug builds; logs an error and continues in release builds.
///
/// A single bad event or a transient collector outage should never take
/// the whole agent down, but a debug build should still fail loudly so the
/// invariant violation isn't lost during development.
#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => (if cfg!(debug_assertions) { panic!($($arg)*); } else { tracing::error!($($arg)*) })
}
