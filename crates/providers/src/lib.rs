use async_trait::async_trait;
use nowplaying_sync_core::{AppConfig, TrackSnapshot};
use std::time::Duration;
use thiserror::Error;

pub use lastfm::LastFmSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    Network,
    Source,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {budget_ms} ms")]
    Timeout { budget_ms: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("source error {code}: {message}")]
    Source { code: i64, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
            FetchError::Network(_)
            | FetchError::Status(_)
            | FetchError::Decode(_)
            | FetchError::InvalidEndpoint(_) => FetchErrorKind::Network,
            FetchError::Source { .. } => FetchErrorKind::Source,
        }
    }
}

/// Adapter boundary between a "recently played" origin and the scheduler.
///
/// `Ok(None)` means the origin knows of no track, which is not an error.
#[async_trait]
pub trait TrackSource: Send {
    fn name(&self) -> &'static str;
    async fn fetch_latest(&mut self) -> Result<Option<TrackSnapshot>, FetchError>;
}

/// Builds the source named by `cfg.source.kind`; unknown kinds fall back to
/// [`NullSource`].
pub fn build_source(cfg: &AppConfig) -> Result<Box<dyn TrackSource>, FetchError> {
    match cfg.source.kind.as_str() {
        "lastfm" => Ok(Box::new(LastFmSource::new(
            &cfg.source.endpoint,
            &cfg.source.user,
            &cfg.source.api_key,
            Duration::from_millis(cfg.intervals.request_timeout_ms),
        )?)),
        "null" => Ok(Box::new(NullSource)),
        other => {
            tracing::warn!(kind = other, "unknown source kind; using null source");
            Ok(Box::new(NullSource))
        }
    }
}

pub struct NullSource;

#[async_trait]
impl TrackSource for NullSource {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn fetch_latest(&mut self) -> Result<Option<TrackSnapshot>, FetchError> {
        Ok(None)
    }
}

mod lastfm;
