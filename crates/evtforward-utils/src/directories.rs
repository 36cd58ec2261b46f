use std::path::PathBuf;

use directories::BaseDirs;
use tracing::warn;

/// Base directory for all of this app's persistent state.
pub fn local_share_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    let Some(base_dirs) = BaseDirs::new() else {
        warn!("couldn't find basedirs, storing data in /tmp/<app_name>");
        return PathBuf::from(format!("/tmp/{}", app_name.as_ref()));
    };
    base_dirs.data_dir().join(app_name.as_ref())
}

/// Where the config file and bookmark store live.
pub fn config_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    local_share_dir(app_name).join("config")
}

/// Where rolling debug log files live.
pub fn logs_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    local_share_dir(app_name).join("logs")
}
