pub mod config;
pub mod model;
pub mod urls;

pub use config::{AppConfig, CacheConfig, ConfigIntervals, SourceConfig};
pub use model::{
    epoch_millis, now_millis, CacheEntry, SyncState, TrackSnapshot, CACHE_SCHEMA_VERSION,
    PLACEHOLDER_ARTWORK,
};
