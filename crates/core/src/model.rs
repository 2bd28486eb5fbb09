use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the persisted layout of [`CacheEntry`] changes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Artwork shown when the source has no image for a track.
pub const PLACEHOLDER_ARTWORK: &str = "asset://nowplaying-sync/placeholder-cover.svg";

/// One normalized observation of what is (or was last) playing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork_url: String,
    pub is_playing: bool,
    pub source_url: String,
    /// Client capture time in epoch milliseconds.
    pub observed_at: u64,
}

impl TrackSnapshot {
    /// Title, artist and playing flag decide whether two snapshots describe
    /// the same event. Album, artwork and capture time are ignored.
    pub fn same_event(&self, other: &TrackSnapshot) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.is_playing == other.is_playing
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(default)]
    pub schema_version: u32,
    pub snapshot: TrackSnapshot,
    pub cached_at: u64,
}

impl CacheEntry {
    pub fn new(snapshot: TrackSnapshot, cached_at: u64) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            snapshot,
            cached_at,
        }
    }

    /// An entry stamped in the future (clock skew) still counts as fresh.
    pub fn is_fresh(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.cached_at) < window_ms
    }
}

/// Externally visible sync state, owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Loading,
    Ready(Option<TrackSnapshot>),
    Error(String),
}

impl SyncState {
    pub fn track(&self) -> Option<&TrackSnapshot> {
        match self {
            SyncState::Ready(track) => track.as_ref(),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SyncState::Ready(_))
    }
}

pub fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn now_millis() -> u64 {
    epoch_millis(SystemTime::now())
}
