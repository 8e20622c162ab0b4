//! Bidirectional handle <-> path table handed out by `open`/`opendir`.
//!
//! Handles are monotonically increasing `u64`s starting just above
//! `min_handle`, wrapping back to `min_handle + 1` once `u64::MAX` is
//! reached. [`HandleTable::assign`] walks candidates until it finds a free
//! one or has tried every value in range, at which point it reports
//! [`FsError::OutOfHandles`].

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::FsError;

struct Inner {
    next: u64,
    min_handle: u64,
    handle_to_path: HashMap<u64, String>,
    path_to_handles: HashMap<String, HashSet<u64>>,
}

pub struct HandleTable {
    inner: Mutex<Inner>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_min_handle(0)
    }

    pub fn with_min_handle(min_handle: u64) -> Self {
        HandleTable {
            inner: Mutex::new(Inner {
                next: min_handle,
                min_handle,
                handle_to_path: HashMap::new(),
                path_to_handles: HashMap::new(),
            }),
        }
    }

    pub fn assign(&self, path: &str) -> Result<u64, FsError> {
        if path.is_empty() {
            return Err(FsError::InvalidArg("empty path".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        let min_handle = inner.min_handle;
        let start = inner.next;
        let mut candidate = advance(start, min_handle);
        loop {
            if !inner.handle_to_path.contains_key(&candidate) {
                inner.next = candidate;
                inner.handle_to_path.insert(candidate, path.to_string());
                inner
                    .path_to_handles
                    .entry(path.to_string())
                    .or_default()
                    .insert(candidate);
                return Ok(candidate);
            }
            let next_candidate = advance(candidate, min_handle);
            if next_candidate == start {
                return Err(FsError::OutOfHandles);
            }
            candidate = next_candidate;
        }
    }

    pub fn release(&self, handle: u64) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let path = inner.handle_to_path.remove(&handle)?;
        if let Some(set) = inner.path_to_handles.get_mut(&path) {
            set.remove(&handle);
            if set.is_empty() {
                inner.path_to_handles.remove(&path);
            }
        }
        Some(path)
    }

    pub fn lookup_path(&self, handle: u64) -> Option<String> {
        self.inner.lock().unwrap().handle_to_path.get(&handle).cloned()
    }

    pub fn release_all_for_path(&self, path: &str) -> Vec<u64> {
        let mut inner = self.inner.lock().unwrap();
        let handles: Vec<u64> = inner
            .path_to_handles
            .remove(path)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for h in &handles {
            inner.handle_to_path.remove(h);
        }
        handles
    }
}

fn advance(current: u64, min_handle: u64) -> u64 {
    if current == u64::MAX {
        min_handle.wrapping_add(1)
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_increasing_handles() {
        let table = HandleTable::new();
        let a = table.assign("/a").unwrap();
        let b = table.assign("/b").unwrap();
        assert!(b > a);
    }

    #[test]
    fn release_frees_the_handle_for_reuse() {
        let table = HandleTable::new();
        let a = table.assign("/a").unwrap();
        assert_eq!(table.release(a), Some("/a".to_string()));
        assert_eq!(table.lookup_path(a), None);
    }

    #[test]
    fn rejects_empty_path() {
        let table = HandleTable::new();
        assert!(matches!(table.assign(""), Err(FsError::InvalidArg(_))));
    }

    #[test]
    fn exhaustion_reports_out_of_handles() {
        // Three free slots in [min_handle+1, u64::MAX]: min+1, min+2, min+3==MAX.
        let min_handle = u64::MAX - 3;
        let table = HandleTable::with_min_handle(min_handle);
        let h1 = table.assign("/a").unwrap();
        let h2 = table.assign("/b").unwrap();
        let h3 = table.assign("/c").unwrap();
        assert_eq!(h1, min_handle + 1);
        assert_eq!(h2, min_handle + 2);
        assert_eq!(h3, u64::MAX);
        assert!(matches!(table.assign("/d"), Err(FsError::OutOfHandles)));

        table.release(h2);
        // A slot freed up, so the next assign should succeed again.
        assert!(table.assign("/e").is_ok());
    }

    #[test]
    fn release_all_for_path_clears_every_handle() {
        let table = HandleTable::new();
        let a = table.assign("/x").unwrap();
        let b = table.assign("/x").unwrap();
        let mut released = table.release_all_for_path("/x");
        released.sort_unstable();
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(released, expected);
        assert_eq!(table.lookup_path(a), None);
        assert_eq!(table.lookup_path(b), None);
    }
}
