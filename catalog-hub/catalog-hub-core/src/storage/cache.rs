//! Per-database file content cache with single-flight reads.
//!
//! The first request for a path issues the only read for it; requests that
//! arrive while that read is outstanding wait on the same result. Content is
//! kept for the life of the process because the store is never written while
//! the server runs. A failed read is handed to every waiter and leaves no
//! cache entry, so a later request reads again.

use super::FileSystem;
use crate::error::{QueryError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

type SharedRead = std::result::Result<Bytes, Arc<io::Error>>;
type InFlightMap = Mutex<HashMap<PathBuf, watch::Sender<Option<SharedRead>>>>;

/// Counters describing how requests were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads issued against storage.
    pub reads: u64,
    /// Requests answered from cached content.
    pub hits: u64,
    /// Requests that waited on another request's read.
    pub coalesced: u64,
}

#[derive(Default)]
struct AtomicStats {
    reads: AtomicU64,
    hits: AtomicU64,
    coalesced: AtomicU64,
}

pub struct FileCache {
    files: Arc<dyn FileSystem>,
    entries: Mutex<HashMap<PathBuf, Bytes>>,
    in_flight: InFlightMap,
    stats: AtomicStats,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("entries", &self.entries.lock().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

/// Removes an orphaned in-flight entry if the reading task is dropped before
/// it completes. Waiters then see the sender go away and retry.
struct InFlightGuard<'a> {
    in_flight: &'a InFlightMap,
    path: &'a Path,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.in_flight.lock().remove(self.path);
        }
    }
}

impl FileCache {
    pub fn new(files: Arc<dyn FileSystem>) -> Self {
        Self {
            files,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            stats: AtomicStats::default(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            reads: self.stats.reads.load(Relaxed),
            hits: self.stats.hits.load(Relaxed),
            coalesced: self.stats.coalesced.load(Relaxed),
        }
    }

    /// Returns the content of the file at `path`, reading it at most once.
    pub async fn fetch(&self, path: &Path) -> Result<Bytes> {
        loop {
            if let Some(bytes) = self.cached(path) {
                return Ok(bytes);
            }

            // Register interest before yielding so concurrent callers find us.
            let receiver = {
                let mut in_flight = self.in_flight.lock();
                if let Some(bytes) = self.cached(path) {
                    return Ok(bytes);
                }
                match in_flight.entry(path.to_path_buf()) {
                    Entry::Occupied(entry) => Some(entry.get().subscribe()),
                    Entry::Vacant(entry) => {
                        let (tx, _rx) = watch::channel(None);
                        entry.insert(tx);
                        None
                    }
                }
            };

            match receiver {
                Some(mut rx) => {
                    self.stats.coalesced.fetch_add(1, Relaxed);
                    debug!(path = %path.display(), "waiting on in-flight read");
                    loop {
                        let current = rx.borrow_and_update().clone();
                        if let Some(result) = current {
                            return result.map_err(|source| QueryError::Storage {
                                path: path.to_path_buf(),
                                source,
                            });
                        }
                        if rx.changed().await.is_err() {
                            // reader went away without an answer; try again
                            break;
                        }
                    }
                }
                None => return self.read_through(path).await,
            }
        }
    }

    fn cached(&self, path: &Path) -> Option<Bytes> {
        let bytes = self.entries.lock().get(path).cloned();
        if bytes.is_some() {
            self.stats.hits.fetch_add(1, Relaxed);
        }
        bytes
    }

    async fn read_through(&self, path: &Path) -> Result<Bytes> {
        let mut guard = InFlightGuard {
            in_flight: &self.in_flight,
            path,
            armed: true,
        };

        self.stats.reads.fetch_add(1, Relaxed);
        debug!(path = %path.display(), "reading file");
        let result: SharedRead = self.files.read(path).await.map_err(Arc::new);

        if let Ok(bytes) = &result {
            self.entries.lock().insert(path.to_path_buf(), bytes.clone());
        }
        let sender = self.in_flight.lock().remove(path);
        guard.armed = false;
        if let Some(sender) = sender {
            sender.send_replace(Some(result.clone()));
        }

        result.map_err(|source| QueryError::Storage {
            path: path.to_path_buf(),
            source,
        })
    }
}
