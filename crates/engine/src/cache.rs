use nowplaying_sync_core::{CacheEntry, CACHE_SCHEMA_VERSION};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
enum CacheError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("schema version {found} does not match {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

/// Single-slot snapshot cache, one JSON file per source key.
///
/// Every failure is logged and swallowed: callers see `None` on load and
/// nothing at all on save.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: Option<PathBuf>,
}

impl CacheStore {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: Some(dir.as_ref().join(format!("{}-cache.json", sanitize_key(key)))),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Option<CacheEntry> {
        let path = self.path.as_ref()?;
        if !path.exists() {
            return None;
        }
        match read_entry(path) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(error = %err, "ignoring unusable cache entry");
                None
            }
        }
    }

    pub fn save(&self, entry: &CacheEntry) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        if let Err(err) = write_entry(path, entry) {
            warn!(error = %err, "failed to write snapshot cache");
        }
    }
}

fn read_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let data = std::fs::read_to_string(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entry: CacheEntry = serde_json::from_str(&data)?;
    if entry.schema_version != CACHE_SCHEMA_VERSION {
        return Err(CacheError::SchemaMismatch {
            found: entry.schema_version,
            expected: CACHE_SCHEMA_VERSION,
        });
    }
    Ok(entry)
}

fn write_entry(path: &Path, entry: &CacheEntry) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err)?;
    let data = serde_json::to_vec(entry)?;
    // Each write gets its own temp file; readers only ever see a whole entry.
    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(&data).map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
