//! Persistent cache of negotiated API versions
//!
//! Negotiated versions are stored per `host:port` in a single JSON file under the
//! platform cache directory, each entry stamped with the time it was written. The
//! cache is a hint: a stale or missing entry only means the next client starts
//! from the default version and negotiates again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Environment variable overriding [`DEFAULT_EXPIRY`], in seconds
pub const CACHE_EXPIRY_ENV: &str = "IRONICCLIENT_CACHE_EXPIRY";

/// Entry lifetime when nothing else is configured
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

const CACHE_DIR_NAME: &str = "ironic-client";
const CACHE_FILE_NAME: &str = "api-versions.json";

static DEFAULT_EXPIRY_CELL: OnceLock<Duration> = OnceLock::new();
static GLOBAL_CACHE: OnceLock<Arc<VersionCache>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not determine cache directory for the current platform")]
    CacheDirectoryNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Process-wide entry lifetime
///
/// Reads [`CACHE_EXPIRY_ENV`] the first time it is called; values that are not a
/// whole number of seconds are ignored with a warning.
pub fn default_expiry() -> Duration {
    *DEFAULT_EXPIRY_CELL.get_or_init(|| match std::env::var(CACHE_EXPIRY_ENV) {
        Ok(raw) => parse_expiry(&raw),
        Err(_) => DEFAULT_EXPIRY,
    })
}

fn parse_expiry(raw: &str) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            warn!(
                "Environment variable {} has an invalid value '{}', using default of {}s",
                CACHE_EXPIRY_ENV,
                raw,
                DEFAULT_EXPIRY.as_secs()
            );
            DEFAULT_EXPIRY
        }
    }
}

/// Default location of the cache file
pub fn default_cache_path() -> CacheResult<PathBuf> {
    dirs::cache_dir()
        .ok_or(CacheError::CacheDirectoryNotFound)
        .map(|dir| dir.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME))
}

/// Cache key for a server
///
/// Both parts are kept as given; an absent part is rendered as `none`, so a
/// lookup only hits when host and port are spelled the same way they were saved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerKey {
    host: Option<String>,
    port: Option<String>,
}

impl ServerKey {
    pub fn new(host: Option<impl Into<String>>, port: Option<impl Into<String>>) -> Self {
        Self {
            host: host.map(Into::into),
            port: port.map(Into::into),
        }
    }

    /// Host and explicit port of an endpoint URL
    pub fn from_url(url: &str) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(url)?;
        Ok(Self {
            host: parsed.host_str().map(ToString::to_string),
            port: parsed.port().map(|p| p.to_string()),
        })
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host.as_deref().unwrap_or("none"),
            self.port.as_deref().unwrap_or("none")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    version: String,
    /// Milliseconds since the Unix epoch
    stored_at: u64,
}

impl CacheEntry {
    fn age(&self) -> Duration {
        now_millis()
            .checked_sub(self.stored_at)
            .map_or(Duration::ZERO, Duration::from_millis)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// File-backed store of negotiated versions keyed by server
///
/// Writes within a process are serialized; across processes the last writer wins.
#[derive(Debug)]
pub struct VersionCache {
    path: PathBuf,
    expiry: Duration,
    lock: Mutex<()>,
}

impl VersionCache {
    /// Open a cache backed by `path` using the process-wide expiry
    ///
    /// Nothing is created on disk until the first [`save`](Self::save).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_expiry(path, default_expiry())
    }

    pub fn with_expiry(path: impl Into<PathBuf>, expiry: Duration) -> Self {
        let path = path.into();
        debug!("Version cache at {:?} with expiry {:?}", path, expiry);
        Self {
            path,
            expiry,
            lock: Mutex::new(()),
        }
    }

    /// The shared cache at [`default_cache_path`], opened on first use
    pub fn global() -> CacheResult<Arc<Self>> {
        if let Some(cache) = GLOBAL_CACHE.get() {
            return Ok(Arc::clone(cache));
        }
        let path = default_cache_path()?;
        Ok(Arc::clone(
            GLOBAL_CACHE.get_or_init(|| Arc::new(Self::open(path))),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Record `version` for a server, replacing any earlier entry
    pub fn save(&self, server: &ServerKey, version: &str) -> CacheResult<()> {
        let _guard = self.lock.lock();

        let mut entries = match self.load() {
            Ok(entries) => entries.unwrap_or_default(),
            Err(CacheError::Corrupt { path, source }) => {
                warn!("Discarding corrupt version cache {:?}: {}", path, source);
                HashMap::new()
            }
            Err(e) => return Err(e),
        };

        let key = server.to_string();
        trace!("Caching API version {} for {}", version, key);
        entries.insert(
            key,
            CacheEntry {
                version: version.to_string(),
                stored_at: now_millis(),
            },
        );

        self.store(&entries)
    }

    /// Cached version for a server if it is younger than the cache expiry
    pub fn retrieve(&self, server: &ServerKey) -> Option<String> {
        self.retrieve_with_max_age(server, self.expiry)
    }

    /// Cached version for a server if it is younger than `max_age`
    ///
    /// A missing or unreadable file, an unknown server, and a stale entry all
    /// read as absent.
    pub fn retrieve_with_max_age(&self, server: &ServerKey, max_age: Duration) -> Option<String> {
        let entries = match self.load() {
            Ok(Some(entries)) => entries,
            Ok(None) => return None,
            Err(e) => {
                warn!("Ignoring unreadable version cache {:?}: {}", self.path, e);
                return None;
            }
        };

        let key = server.to_string();
        let entry = entries.get(&key)?;
        if entry.age() >= max_age {
            trace!("Cached API version for {} is stale", key);
            return None;
        }

        trace!("Found cached API version {} for {}", entry.version, key);
        Some(entry.version.clone())
    }

    fn load(&self) -> CacheResult<Option<HashMap<String, CacheEntry>>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn store(&self, entries: &HashMap<String, CacheEntry>) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }

        let data = serde_json::to_vec_pretty(entries)?;

        // Write to a sibling temp file and rename it into place
        let temp_path = self.path.with_extension("tmp");
        let write_result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&data)?;
            file.flush()?;
            fs::rename(&temp_path, &self.path)
        })();

        if write_result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }

        write_result.map_err(CacheError::from)
    }
}

/// Create a directory if missing; losing a creation race is not an error
fn ensure_dir(path: &Path) -> CacheResult<()> {
    if path.is_dir() {
        return Ok(());
    }
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
