//! JSON-file-backed store.
//!
//! Keeps the LRU working set in memory and rewrites a JSON snapshot on every
//! mutation. Recency updates from `get` are not flushed on their own; they are
//! written out with the next mutation.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::error::CacheError;
use super::lock::mutex_lock;
use super::store::{CacheStore, MemoryStore};

const SOURCE: &str = "cache::file_store";

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
struct Snapshot<T> {
    /// Least recently used first.
    entries: Vec<CacheEntry<T>>,
}

/// A [`CacheStore`] that survives restarts by persisting to a JSON file.
pub struct JsonFileStore<T> {
    memory: MemoryStore<T>,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl<T> JsonFileStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Open the store at `path`, loading any existing snapshot.
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file is
    /// logged and also starts empty; it is overwritten on the next mutation.
    pub fn open(path: impl Into<PathBuf>, max_size: Option<NonZeroUsize>) -> Self {
        let path = path.into();
        let memory = MemoryStore::new(max_size);
        memory.restore(load_snapshot::<T>(&path).entries);
        debug!(path = %path.display(), "opened file-backed cache store");

        Self {
            memory,
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change and write it out. Memory is rolled back if the write fails.
    fn mutate(
        &self,
        op: &'static str,
        apply: impl FnOnce(&MemoryStore<T>),
    ) -> Result<(), CacheError> {
        let _guard = mutex_lock(&self.write_lock, SOURCE, op);
        let previous = self.memory.snapshot();
        apply(&self.memory);

        self.persist().inspect_err(|err| {
            warn!(path = %self.path.display(), op, error = %err, "cache write failed, rolling back");
            self.memory.restore(previous);
        })
    }

    fn persist(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| CacheError::io(parent, err))?;
        }

        let snapshot = Snapshot {
            entries: self.memory.snapshot(),
        };
        let data = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.path, data).map_err(|err| CacheError::io(&self.path, err))
    }
}

fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Snapshot<T> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache file is corrupt, starting empty");
                Snapshot { entries: Vec::new() }
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Snapshot { entries: Vec::new() },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read cache file, starting empty");
            Snapshot { entries: Vec::new() }
        }
    }
}

impl<T> CacheStore<T> for JsonFileStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        Ok(self.memory.lookup(key))
    }

    fn set(&self, key: &str, entry: CacheEntry<T>) -> Result<(), CacheError> {
        self.mutate("set", |memory| {
            memory.insert(key, entry);
        })
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.mutate("delete", |memory| {
            memory.remove(key);
        })
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.mutate("clear", MemoryStore::remove_all)
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.memory.keys_oldest_first())
    }
}
