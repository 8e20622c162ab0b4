//! `LocalFsRegistry`: the path→`LocalFile` map that governs creation,
//! lookup, and release of staged writable files.
//!
//! The registry's own lock only ever protects the map itself; it is
//! dropped before any per-file I/O runs, so concurrent writers to different
//! paths never block each other on this lock (per-file locking lives inside
//! `MemoryLocalFile` instead).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bucket::BlockingBucket;
use crate::local_file::{LocalFile, MemoryLocalFile};

pub struct LocalFsRegistry {
    files: Mutex<HashMap<String, Arc<MemoryLocalFile>>>,
    chunk_size: usize,
    max_size: u64,
}

impl LocalFsRegistry {
    pub fn new(chunk_size: usize, max_size: u64) -> LocalFsRegistry {
        LocalFsRegistry { files: Mutex::new(HashMap::new()), chunk_size, max_size }
    }

    pub fn find(&self, path: &str) -> Option<Arc<MemoryLocalFile>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// Inserts a new empty staging file for `path`, or returns the existing
    /// one if a writer already has the path open (single-LocalFile-per-path).
    pub fn create(&self, path: &str) -> Arc<MemoryLocalFile> {
        self.create_with_chunk_size(path, self.chunk_size)
    }

    pub fn create_with_chunk_size(&self, path: &str, chunk_size: usize) -> Arc<MemoryLocalFile> {
        let mut files = self.files.lock().unwrap();
        files
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(MemoryLocalFile::new(chunk_size, self.max_size)))
            .clone()
    }

    /// Flushes (best-effort, logging but not propagating failure) and drops
    /// the staging entry for `path`, if one exists.
    pub fn release(&self, path: &str, bucket: &BlockingBucket) {
        let file = self.files.lock().unwrap().remove(path);
        if let Some(file) = file {
            if let Err(e) = file.flush(bucket, path) {
                log::warn!("flush on release failed path={path} err={e}");
            }
        }
    }

    pub fn release_all(&self, flush: bool, bucket: &BlockingBucket) {
        let drained: Vec<(String, Arc<MemoryLocalFile>)> = self.files.lock().unwrap().drain().collect();
        for (path, file) in drained {
            if flush {
                if let Err(e) = file.flush(bucket, &path) {
                    log::warn!("flush during release_all failed path={path} err={e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::mock::MockBucket;
    use tokio::runtime::Runtime;

    fn bucket() -> BlockingBucket {
        let runtime = Arc::new(Runtime::new().unwrap());
        BlockingBucket::new(Arc::new(MockBucket::new()), runtime)
    }

    #[test]
    fn create_returns_existing_entry_for_same_path() {
        let registry = LocalFsRegistry::new(8, 1024);
        let a = registry.create("/a");
        a.write(b"hi", 0).unwrap();
        let b = registry.create("/a");
        assert_eq!(b.size(), 2);
    }

    #[test]
    fn release_removes_entry_after_flushing() {
        let b = bucket();
        b.store_blob(b"", "/a").unwrap();
        let registry = LocalFsRegistry::new(8, 1024);
        let file = registry.create("/a");
        file.write(b"data", 0).unwrap();
        registry.release("/a", &b);
        assert!(registry.find("/a").is_none());
    }

    #[test]
    fn release_on_missing_path_is_a_noop() {
        let b = bucket();
        let registry = LocalFsRegistry::new(8, 1024);
        registry.release("/does-not-exist", &b);
    }
}
