use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Maps the config/CLI `debug_level` (0 quiet .. 5 loudest) onto a
/// `tracing` level filter.
fn level_for(debug_level: u8) -> LevelFilter {
    match debug_level {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Initializes the global `tracing` subscriber. `--console` logs to
/// stdout; otherwise it writes to a daily-rolling file under
/// `log_dir`/evtforward.log. The returned
/// guard must be held for the process lifetime or buffered log lines are
/// lost on exit.
pub fn init(console: bool, debug_level: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::builder().with_default_directive(level_for(debug_level).into()).from_env_lossy();

    if console || log_dir.is_none() {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
        return None;
    }

    let log_dir = log_dir.expect("checked above");
    let _ = std::fs::create_dir_all(log_dir);
    let appender = tracing_appender::rolling::daily(log_dir, "evtforward.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(writer).with_ansi(false).init();
    Some(guard)
}
