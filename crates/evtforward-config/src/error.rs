use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: toml::de::Error },

    #[error("failed to write bookmark file {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to serialize bookmark file {path}: {source}")]
    Serialize { path: PathBuf, #[source] source: toml::ser::Error },
}
