use std::path::PathBuf;

use clap::Parser;

/// CLI surface of the host agent: normally started as a
/// long-lived service, `--console` runs it in the foreground instead.
#[derive(Debug, Parser)]
#[command(name = "evtforward-agent", version, about = "Forwards platform event-log records to one or two collectors")]
pub struct Cli {
    /// Run in the foreground with logs on stdout instead of as a service
    /// writing to the rolling debug log file.
    #[arg(long)]
    pub console: bool,

    /// Overrides the configured debug log level (0 = quiet, higher =
    /// louder), overriding whatever the config file sets.
    #[arg(long = "debug-level")]
    pub debug_level: Option<u8>,

    /// Path to the agent's TOML configuration file.
    #[arg(long, default_value = "evtforward.toml")]
    pub config: PathBuf,
}
