//! Bridges `fuser`'s inode-addressed model onto the core's path-addressed
//! one. Inode `1` is always `/`; every other path gets the next free `u64`
//! the first time `lookup`/`mkdir`/`create`/`symlink` sees it. Inodes are
//! never reused once handed out, matching the teacher's original
//! `PathTagFsFuse` storage (`BlockStorage`'s own inode counter never
//! recycled ids either).

use std::collections::HashMap;
use std::sync::Mutex;

pub const ROOT_INO: u64 = 1;

struct Inner {
    next: u64,
    ino_to_path: HashMap<u64, String>,
    path_to_ino: HashMap<String, u64>,
}

pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> InodeTable {
        let mut ino_to_path = HashMap::new();
        let mut path_to_ino = HashMap::new();
        ino_to_path.insert(ROOT_INO, "/".to_string());
        path_to_ino.insert("/".to_string(), ROOT_INO);
        InodeTable { inner: Mutex::new(Inner { next: ROOT_INO + 1, ino_to_path, path_to_ino }) }
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.inner.lock().unwrap().ino_to_path.get(&ino).cloned()
    }

    /// Returns the inode for `path`, assigning a fresh one if this is the
    /// first time the path has been seen.
    pub fn ino_for(&self, path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(ino) = inner.path_to_ino.get(path) {
            return *ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.ino_to_path.insert(ino, path.to_string());
        inner.path_to_ino.insert(path.to_string(), ino);
        ino
    }

    /// Renames the path an inode maps to, keeping the inode number stable.
    /// Unused by the current operation set (no `rename` in scope) but kept
    /// as the natural extension point.
    #[allow(dead_code)]
    pub fn rebind(&self, old_path: &str, new_path: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(ino) = inner.path_to_ino.remove(old_path) {
            inner.path_to_ino.insert(new_path.to_string(), ino);
            inner.ino_to_path.insert(ino, new_path.to_string());
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

impl InodeTable {
    pub fn child_path(&self, parent_ino: u64, name: &str) -> Option<String> {
        self.path_of(parent_ino).map(|parent| join(&parent, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_inode_one() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INO).as_deref(), Some("/"));
        assert_eq!(table.ino_for("/"), ROOT_INO);
    }

    #[test]
    fn new_paths_get_increasing_fresh_inodes() {
        let table = InodeTable::new();
        let a = table.ino_for("/a");
        let b = table.ino_for("/b");
        assert_ne!(a, b);
        assert!(a > ROOT_INO && b > ROOT_INO);
        assert_eq!(table.ino_for("/a"), a);
    }

    #[test]
    fn child_path_joins_parent_and_name() {
        let table = InodeTable::new();
        assert_eq!(table.child_path(ROOT_INO, "a").as_deref(), Some("/a"));
        let a = table.ino_for("/a");
        assert_eq!(table.child_path(a, "b").as_deref(), Some("/a/b"));
    }
}
