//! Version-pinned TTL cache over [`analyze`] results.
//!
//! The cache file is shared by every orchestrator process of the user, so
//! writes go through an advisory file lock on a sidecar. Version probes are
//! memoised in-process for a short horizon to keep `get_pattern` cheap.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cao_core::Descriptor;

use crate::analyzer::{analyze, probe_version};
use crate::pattern::{DEFAULT_TTL_DAYS, InvocationPattern};

/// How long a probed version string is trusted without re-probing.
const VERSION_HORIZON: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: HashMap<String, InvocationPattern>,
}

/// Handle to `help-cache.json`.
#[derive(Debug)]
pub struct HelpCache {
    path: PathBuf,
    ttl: chrono::Duration,
    versions: Mutex<HashMap<String, (String, Instant)>>,
}

impl HelpCache {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ttl: chrono::Duration::days(DEFAULT_TTL_DAYS),
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(path: PathBuf, ttl: chrono::Duration) -> Self {
        Self {
            path,
            ttl,
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached pattern for an assistant, re-analyzing when the
    /// entry is missing, older than the TTL, or pinned to another version.
    pub async fn get_pattern(
        &self,
        descriptor: &Descriptor,
        executable: &str,
    ) -> Result<InvocationPattern> {
        let assistant = descriptor.name.as_str();
        let current_version = self.current_version(descriptor, executable).await;

        if let Some(entry) = self.load().entries.get(assistant) {
            if entry.is_fresh(self.ttl, &current_version) {
                debug!(assistant, version = %current_version, "help cache hit");
                return Ok(entry.clone());
            }
            debug!(assistant, "help cache entry stale; re-analyzing");
        }

        let pattern = analyze(descriptor, executable).await;
        self.store(|file| {
            file.entries.insert(assistant.to_string(), pattern.clone());
        })?;
        info!(assistant, convention = ?pattern.convention, "help cache refreshed");
        Ok(pattern)
    }

    /// Cached entry without probing (used by `doctor` and tests).
    pub fn peek(&self, assistant: &str) -> Option<InvocationPattern> {
        self.load().entries.get(assistant).cloned()
    }

    /// Drop an assistant's entry, forcing re-analysis on next use.
    pub fn invalidate(&self, assistant: &str, reason: &str) -> Result<()> {
        warn!(assistant, reason, "invalidating help cache entry");
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(assistant);
        self.store(|file| {
            file.entries.remove(assistant);
        })
    }

    async fn current_version(&self, descriptor: &Descriptor, executable: &str) -> String {
        let assistant = descriptor.name.as_str();
        {
            let versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((version, probed_at)) = versions.get(assistant) {
                if probed_at.elapsed() < VERSION_HORIZON {
                    return version.clone();
                }
            }
        }

        let version = probe_version(descriptor, executable).await;
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(assistant.to_string(), (version.clone(), Instant::now()));
        version
    }

    fn load(&self) -> CacheFile {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt help cache; resetting");
                CacheFile::default()
            }),
            Err(_) => CacheFile::default(),
        }
    }

    /// Read-modify-write under the sidecar advisory lock.
    fn store(&self, mutate: impl FnOnce(&mut CacheFile)) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache directory: {}", parent.display())
            })?;
        }

        let lock_path = lock_path_for(&self.path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open cache lock: {}", lock_path.display()))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock
            .write()
            .with_context(|| format!("failed to lock cache: {}", lock_path.display()))?;

        let mut file = self.load();
        mutate(&mut file);
        let json = serde_json::to_string_pretty(&file).context("failed to serialize help cache")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write help cache: {}", self.path.display()))?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}
