//! Persisted key/value storage shared between instances
//!
//! The cache, the bootstrap context and the lock record all live in a
//! [`KeyValueStore`]. Storage may be unavailable altogether, in which case
//! [`DegradingStore`] keeps the session going in memory.

use crate::logging::Logger;
use crate::{BeaconError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// String key/value storage with fallible operations
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON document on disk.
///
/// Every operation re-reads the file so that separate processes sharing the
/// directory observe each other's writes; last writer wins. Writes go to a
/// per-write temporary file that is renamed over the document, so readers
/// never see a partial file. A document that does not parse is treated as
/// empty and replaced by the next write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_guard: Mutex<()>,
    logger: Logger,
}

impl FileStore {
    /// Open (or lazily create) `store.json` inside `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join("store.json"),
            write_guard: Mutex::new(()),
            logger: Logger::new("file-store"),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    self.logger.warn(&format!(
                        "Ignoring unreadable store file {}: {}",
                        self.path.display(),
                        e
                    ));
                    Ok(HashMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            Uuid::new_v4().simple()
        ));
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(BeaconError::storage(format!(
                "Failed to replace store file {}: {}",
                self.path.display(),
                e
            )));
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// Wraps a store and switches to memory-only operation after its first failure
pub struct DegradingStore {
    primary: Arc<dyn KeyValueStore>,
    fallback: MemoryStore,
    degraded: AtomicBool,
    logger: Logger,
}

impl DegradingStore {
    /// Wrap `primary`
    pub fn new(primary: Arc<dyn KeyValueStore>) -> Self {
        Self {
            primary,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(false),
            logger: Logger::new("storage"),
        }
    }

    /// Whether the primary store has been abandoned for this session
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, err: &BeaconError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            self.logger.warn(&format!(
                "Persistent storage unavailable ({}), continuing in memory for this session",
                err
            ));
        }
    }
}

impl KeyValueStore for DegradingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if !self.is_degraded() {
            match self.primary.get(key) {
                Ok(value) => return Ok(value),
                Err(e) => self.degrade(&e),
            }
        }
        self.fallback.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if !self.is_degraded() {
            match self.primary.set(key, value) {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e),
            }
        }
        self.fallback.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !self.is_degraded() {
            match self.primary.remove(key) {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e),
            }
        }
        self.fallback.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingStore;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileStore::open(dir.path()).unwrap();
        let second = FileStore::open(dir.path()).unwrap();

        first.set("beacon:localhost:config", "{}").unwrap();
        assert_eq!(
            second.get("beacon:localhost:config").unwrap().as_deref(),
            Some("{}")
        );

        second.remove("beacon:localhost:config").unwrap();
        assert!(first.get("beacon:localhost:config").unwrap().is_none());
    }

    #[test]
    fn test_file_store_replaces_unreadable_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(store.path(), "not json").unwrap();
        assert!(store.get("x").unwrap().is_none());

        store.set("x", "1").unwrap();
        assert_eq!(store.get("x").unwrap().as_deref(), Some("1"));
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(serde_json::from_str::<HashMap<String, String>>(&raw).is_ok());
    }

    #[test]
    fn test_file_store_concurrent_writers_never_fail() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let store = FileStore::open(&path).unwrap();
                    (0..200)
                        .filter(|i| store.set(&format!("writer-{}", n), &i.to_string()).is_err())
                        .count()
                })
            })
            .collect();

        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(failures, 0);

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_degrading_store_falls_back_to_memory() {
        let store = DegradingStore::new(Arc::new(FailingStore));
        assert!(!store.is_degraded());

        store.set("k", "v").unwrap();
        assert!(store.is_degraded());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_degrading_store_passes_through_when_healthy() {
        let primary = Arc::new(MemoryStore::new());
        let store = DegradingStore::new(primary.clone());
        store.set("k", "v").unwrap();
        assert_eq!(primary.get("k").unwrap().as_deref(), Some("v"));
        assert!(!store.is_degraded());
    }
}
