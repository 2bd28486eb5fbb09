use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigIntervals {
    pub playing_poll_ms: u64,
    pub idle_poll_ms: u64,
    pub request_timeout_ms: u64,
    pub seed_delay_ms: u64,
    pub cache_freshness_ms: u64,
    pub file_watch_poll_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            playing_poll_ms: 10_000,
            idle_poll_ms: 30_000,
            request_timeout_ms: 5_000,
            seed_delay_ms: 1_000,
            cache_freshness_ms: 120_000,
            file_watch_poll_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: String,
    pub endpoint: String,
    pub user: String,
    pub api_key: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: "lastfm".to_string(),
            endpoint: "https://ws.audioscrobbler.com/2.0/".to_string(),
            user: "YOUR_LASTFM_USER".to_string(),
            api_key: "YOUR_LASTFM_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub key: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub intervals: ConfigIntervals,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Storage key for this source, e.g. `lastfm-someuser`.
    pub fn cache_key(&self) -> String {
        self.cache
            .key
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.source.kind, self.source.user))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            source: SourceConfig::default(),
            intervals: ConfigIntervals::default(),
            cache: CacheConfig::default(),
            log_level: default_log_level(),
        }
    }
}
