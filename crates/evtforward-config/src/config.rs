use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// One collector endpoint's connection parameters, shared by the primary
/// and optional secondary sink slots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub url: String,
    pub api_token: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

/// Either a fixed severity for every record, or "dynamic" — take whatever
/// the platform reports, mapped through the fixed table in
/// `evtforward-events::Severity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityPolicy {
    Dynamic,
    Fixed(u8),
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        SeverityPolicy::Dynamic
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventIdFilterMode {
    /// Only forward event-ids in the list.
    Include,
    /// Forward everything except event-ids in the list.
    Ignore,
}

/// An event-id include/exclude list with an include-vs-ignore mode flag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventIdFilter {
    pub mode: Option<EventIdFilterMode>,
    #[serde(default)]
    pub ids: Vec<u32>,
}

impl EventIdFilter {
    /// Whether `event_id` should be forwarded. An empty list with no mode
    /// configured forwards everything.
    pub fn allows(&self, event_id: u32) -> bool {
        match self.mode {
            None => true,
            Some(EventIdFilterMode::Include) => self.ids.contains(&event_id),
            Some(EventIdFilterMode::Ignore) => !self.ids.contains(&event_id),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TailConfig {
    pub path: PathBuf,
    pub program_name: String,
}

/// Per-channel settings: whether to subscribe at all, and the bookmark
/// carried over from a prior config-file-only setup. Once the agent has
/// run once, bookmarks move to the sibling bookmark store
/// ([`crate::bookmarks::TomlBookmarkStore`]) and this field is only a
/// seed for a brand-new channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub bookmark: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Every key the external Config Loader collaborator exposes,
/// parsed from a `toml` file the way the rest of the retrieval pack
/// configures long-running services — the teacher itself carries no
/// config crate, so this one is new code built in its idiom
/// (`serde`+`thiserror`, `tracing` on load failure).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub primary: CollectorConfig,
    pub secondary: Option<CollectorConfig>,

    #[serde(default = "default_batch_age_secs")]
    pub batch_age_secs: u64,
    #[serde(default = "default_batch_count")]
    pub batch_count: usize,

    #[serde(default = "default_facility")]
    pub facility: u8,
    #[serde(default)]
    pub severity: SeverityPolicy,

    pub host_override: Option<String>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    pub tail: Option<TailConfig>,

    #[serde(default)]
    pub event_id_filter: EventIdFilter,

    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,

    #[serde(default)]
    pub debug_level: u8,
    pub debug_log_file: Option<PathBuf>,
}

fn default_batch_age_secs() -> u64 {
    5
}
fn default_batch_count() -> usize {
    100
}
fn default_facility() -> u8 {
    1
}
fn default_poll_interval_secs() -> u64 {
    1
}

impl AgentConfig {
    /// Reads and parses the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: AgentConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        info!(path = %path.display(), "loaded agent configuration");
        if config.batch_count == 0 {
            warn!("batch_count is 0, sender loop will never batch anything");
        }
        Ok(config)
    }

    pub fn channel_enabled(&self, channel: &str) -> bool {
        self.channels.get(channel).is_none_or(|c| c.enabled)
    }

    /// Bookmark seeded from the config file for a channel that has never
    /// been persisted to the bookmark store yet.
    pub fn seed_bookmark(&self, channel: &str) -> Option<&str> {
        self.channels.get(channel).and_then(|c| c.bookmark.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [primary]
            url = "https://collector.example.com/events"
            api_token = "abc123"
            tls = true
        "#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.primary.url, "https://collector.example.com/events");
        assert_eq!(config.batch_age_secs, 5);
        assert_eq!(config.batch_count, 100);
        assert_eq!(config.severity, SeverityPolicy::Dynamic);
        assert!(config.secondary.is_none());
    }

    #[test]
    fn parses_full_config_with_channels_and_filter() {
        let toml = r#"
            [primary]
            url = "https://primary.example.com"
            tls = true

            [secondary]
            url = "tcp://secondary.example.com:515"
            tls = false

            batch_age_secs = 10
            batch_count = 250
            facility = 4
            severity = "dynamic"
            poll_interval_secs = 2
            debug_level = 2

            [event_id_filter]
            mode = "ignore"
            ids = [4624, 4625]

            [channels.Security]
            enabled = true
            bookmark = "opaque-token"

            [channels.Application]
            enabled = false
        "#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.batch_count, 250);
        assert!(config.event_id_filter.allows(1000));
        assert!(!config.event_id_filter.allows(4624));
        assert!(config.channel_enabled("Security"));
        assert!(!config.channel_enabled("Application"));
        assert!(config.channel_enabled("Setup")); // unknown channel defaults enabled
        assert_eq!(config.seed_bookmark("Security"), Some("opaque-token"));
    }

    #[test]
    fn missing_file_surfaces_read_error() {
        let err = AgentConfig::load("/nonexistent/path/agent.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
