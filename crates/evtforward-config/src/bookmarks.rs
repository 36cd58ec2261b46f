use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use evtforward_events::BookmarkStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BookmarkFile {
    #[serde(flatten)]
    tokens: HashMap<String, String>,
}

/// Persists per-channel bookmark tokens to a sibling `bookmarks.toml`, one
/// flat `channel = "token"` table. Spec §6's "Persisted state: per-channel
/// bookmark tokens under stable keys" — writes are whole-file rewrites
/// since bookmark commits happen at most once per sender-loop iteration,
/// never on a hot path.
pub struct TomlBookmarkStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl TomlBookmarkStore {
    /// Loads any bookmarks already on disk at `path`, or starts empty if
    /// the file doesn't exist yet (first run).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let file: BookmarkFile = toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
                file.tokens
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Ok(Self { path, cache: Mutex::new(tokens) })
    }

    fn persist(&self, tokens: &HashMap<String, String>) -> Result<(), ConfigError> {
        let file = BookmarkFile { tokens: tokens.clone() };
        let text = toml::to_string_pretty(&file).map_err(|source| ConfigError::Serialize { path: self.path.clone(), source })?;
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(&self.path, text).map_err(|source| ConfigError::Write { path: self.path.clone(), source })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BookmarkStore for TomlBookmarkStore {
    fn read_bookmark(&self, channel: &str) -> Option<String> {
        self.cache.lock().expect("bookmark cache poisoned").get(channel).cloned()
    }

    fn write_bookmark(&self, channel: &str, token: &str) {
        let mut cache = self.cache.lock().expect("bookmark cache poisoned");
        cache.insert(channel.to_string(), token.to_string());
        if let Err(err) = self.persist(&cache) {
            warn!(channel, error = %err, "failed to persist bookmark, will retry on next commit");
        }
    }
}
