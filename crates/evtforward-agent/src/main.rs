use clap::Parser;
use evtforward_agent::cli::Cli;
use evtforward_agent::logging;
use evtforward_agent::AgentRuntime;
use evtforward_config::{AgentConfig, TomlBookmarkStore};
use tracing::error;

const APP_NAME: &str = "evtforward";

fn main() {
    let cli = Cli::parse();

    let config = match AgentConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            // Logging isn't initialized yet; a config we can't even parse
            // means there's no debug_level to honor anyway.
            eprintln!("failed to load configuration from {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };

    let debug_level = cli.debug_level.unwrap_or(config.debug_level);
    let log_dir = config
        .debug_log_file
        .as_ref()
        .and_then(|path| path.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| evtforward_utils::directories::logs_dir(APP_NAME));
    let _guard = logging::init(cli.console, debug_level, Some(&log_dir));

    let bookmarks_path = evtforward_utils::directories::config_dir(APP_NAME).join("bookmarks.toml");
    let bookmarks = match TomlBookmarkStore::open(&bookmarks_path) {
        Ok(store) => store,
        Err(err) => {
            error!(path = %bookmarks_path.display(), error = %err, "failed to open bookmark store");
            std::process::exit(1);
        }
    };

    let runtime = match AgentRuntime::build(config, bookmarks) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build agent runtime");
            std::process::exit(1);
        }
    };

    std::process::exit(runtime.run());
}
