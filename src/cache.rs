use eyre::{Result, WrapErr};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::DiscoveredServer;

/// Key the last scan result is stored under
pub const SERVERS_KEY: &str = "garcon.cachedServers.v1";

const CACHE_FILE_NAME: &str = "cache.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Platform cache location, e.g. ~/Library/Caches/garcon/cache.json on macOS
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("garcon").join(CACHE_FILE_NAME))
}

/// Small key-value blob store backed by one JSON file.
///
/// Every failure is logged and swallowed: a missing or corrupt cache only
/// means the first screen starts empty. Clones share one write lock.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCache {
    path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl SnapshotCache {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: Arc::default(),
        }
    }

    /// A cache that never reads or writes
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load_servers(&self) -> Vec<DiscoveredServer> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        match read_key(path, SERVERS_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<Vec<DiscoveredServer>>(value) {
                Ok(servers) => {
                    log::debug!("[cache] loaded: path={} servers={}", path.display(), servers.len());
                    servers
                }
                Err(e) => {
                    log::warn!("[cache] decode_failed: path={} error={}", path.display(), e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("[cache] read_failed: path={} error={:#}", path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn save_servers(&self, servers: &[DiscoveredServer]) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_value(servers)
            .wrap_err("Failed to encode servers")
            .and_then(|value| write_key(path, SERVERS_KEY, value));
        match result {
            Ok(()) => log::trace!("[cache] saved: path={} servers={}", path.display(), servers.len()),
            Err(e) => log::warn!("[cache] write_failed: path={} error={:#}", path.display(), e),
        }
    }
}

fn read_store(path: &Path) -> Result<Map<String, Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e).wrap_err_with(|| format!("Failed to read {}", path.display())),
    };
    serde_json::from_str(&text).wrap_err_with(|| format!("Invalid cache file {}", path.display()))
}

fn read_key(path: &Path, key: &str) -> Result<Option<Value>> {
    Ok(read_store(path)?.remove(key))
}

fn write_key(path: &Path, key: &str, value: Value) -> Result<()> {
    // A corrupt store is replaced rather than blocking writes forever
    let mut store = read_store(path).unwrap_or_default();
    store.insert(key.to_string(), value);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }

    // unique per write so concurrent writers never share a temp file
    let tmp = path.with_extension(format!(
        "json.{}.{}.tmp",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, serde_json::to_vec_pretty(&store)?)
        .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).wrap_err_with(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}
