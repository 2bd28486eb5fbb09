use nowplaying_sync_core::AppConfig;
use std::time::Duration;

pub mod cache;
pub mod reconcile;
pub mod scheduler;

pub use cache::CacheStore;
pub use reconcile::{compute_diff, merge, DiffKind};
pub use scheduler::{Scheduler, SyncController, SyncHandle};

/// Floor for both poll intervals.
pub const MIN_POLL: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub playing_poll: Duration,
    pub idle_poll: Duration,
    pub seed_delay: Duration,
    pub cache_freshness: Duration,
}

impl SchedulerConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            playing_poll: Duration::from_millis(cfg.intervals.playing_poll_ms).max(MIN_POLL),
            idle_poll: Duration::from_millis(cfg.intervals.idle_poll_ms).max(MIN_POLL),
            seed_delay: Duration::from_millis(cfg.intervals.seed_delay_ms),
            cache_freshness: Duration::from_millis(cfg.intervals.cache_freshness_ms),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}
