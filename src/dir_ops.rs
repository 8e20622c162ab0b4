//! `mkdir`, `rmdir`, `opendir`, `readdir`, `releasedir`, `fsyncdir`.

use crate::error::FsError;
use crate::meta::{Metadata, NodeType};
use crate::session_ops::Session;

pub fn mkdir(session: &Session, path: &str, mode: u32, uid: u32, gid: u32) -> Result<(), FsError> {
    log::debug!("mkdir path={path} mode={mode:o}");
    let full_mode = mode | libc::S_IFDIR as u32;

    let stored = session
        .bucket
        .store_blob(&[], path)
        .map_err(|_| FsError::Permission(path.to_string()))?;

    let now = crate::meta::now_ms();
    let meta = Metadata::new_for(NodeType::Directory, path, full_mode, uid, gid, now);
    session.bucket.update_metadata(stored.id, meta.to_document())?;
    Ok(())
}

pub fn rmdir(session: &Session, path: &str) -> Result<(), FsError> {
    log::debug!("rmdir path={path}");
    let children = session.bucket.list_by_directory(path)?;
    if !children.is_empty() {
        return Err(FsError::NotEmpty(path.to_string()));
    }
    session.bucket.remove_by_filename(path)?;
    Ok(())
}

pub fn opendir(session: &Session, path: &str) -> Result<u64, FsError> {
    log::debug!("opendir path={path}");
    let found = session.bucket.find_by_filename(path)?.ok_or_else(|| FsError::NotFound(path.to_string()))?;
    if (found.metadata.mode & libc::S_IFMT as u32) != libc::S_IFDIR as u32 {
        return Err(FsError::NotADirectory(path.to_string()));
    }
    session.handles.assign(path)
}

pub fn readdir<F: FnMut(&str)>(session: &Session, path: &str, handle: u64, mut filler: F) -> Result<(), FsError> {
    log::debug!("readdir path={path} handle={handle}");
    if session.handles.lookup_path(handle).as_deref() != Some(path) {
        return Err(FsError::BadHandle(handle));
    }

    filler(".");
    filler("..");

    let entries = session.bucket.list_by_directory(path)?;
    for entry in entries {
        match entry {
            Ok(file) => {
                let name = &file.metadata.basename;
                if !name.is_empty() {
                    filler(name);
                } else if path == "/" {
                    let derived = file.filename.trim_start_matches('/');
                    if !derived.is_empty() {
                        filler(derived);
                    }
                } else {
                    log::warn!("skipping entry with empty basename path={} filename={}", path, file.filename);
                }
            }
            Err(e) => {
                log::error!("decode error listing directory path={path} err={e}");
            }
        }
    }
    Ok(())
}

pub fn releasedir(session: &Session, handle: u64) -> Result<(), FsError> {
    log::debug!("releasedir handle={handle}");
    if session.handles.lookup_path(handle).is_none() {
        return Err(FsError::BadHandle(handle));
    }
    session.handles.release(handle);
    Ok(())
}

/// Always `ENOTSUP` per spec.md's resolution of the `fsyncdir` Open Question.
pub fn fsyncdir() -> Result<(), FsError> {
    Err(FsError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::mock::MockBucket;
    use crate::bucket::BlockingBucket;
    use crate::options::Options;
    use crate::session_ops::Session;
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    fn session() -> Session {
        let runtime = Arc::new(Runtime::new().unwrap());
        let bucket = BlockingBucket::new(Arc::new(MockBucket::new()), runtime);
        let options = Options {
            host: "localhost".to_string(),
            port: 27017,
            db: "test".to_string(),
            coll_prefix: "fs".to_string(),
            log_file: None,
            log_level: log::LevelFilter::Info,
            mem_chunk_size_bytes: 128 * 1024,
            max_mem_file_chunks: 512,
            enable_dyn_mem_chunk: false,
            mountpoint: "/mnt".to_string(),
            auto_unmount: false,
            allow_root: false,
        };
        Session::new(options, bucket)
    }

    #[test]
    fn mkdir_then_rmdir_round_trips() {
        let s = session();
        mkdir(&s, "/a", 0o755, 1, 1).unwrap();
        rmdir(&s, "/a").unwrap();
        assert!(opendir(&s, "/a").is_err());
    }

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let s = session();
        mkdir(&s, "/a", 0o755, 1, 1).unwrap();
        mkdir(&s, "/a/b", 0o755, 1, 1).unwrap();
        assert!(matches!(rmdir(&s, "/a"), Err(FsError::NotEmpty(_))));
        rmdir(&s, "/a/b").unwrap();
        rmdir(&s, "/a").unwrap();
    }

    #[test]
    fn readdir_always_starts_with_dot_entries() {
        let s = session();
        mkdir(&s, "/a", 0o755, 1, 1).unwrap();
        mkdir(&s, "/a/b", 0o755, 1, 1).unwrap();
        let h = opendir(&s, "/a").unwrap();
        let mut seen = Vec::new();
        readdir(&s, "/a", h, |name| seen.push(name.to_string())).unwrap();
        assert_eq!(seen[0], ".");
        assert_eq!(seen[1], "..");
        assert!(seen.contains(&"b".to_string()));
    }

    #[test]
    fn readdir_rejects_unknown_handle() {
        let s = session();
        mkdir(&s, "/a", 0o755, 1, 1).unwrap();
        assert!(matches!(readdir(&s, "/a", 999, |_| {}), Err(FsError::BadHandle(_))));
    }

    #[test]
    fn fsyncdir_is_unsupported() {
        assert!(matches!(fsyncdir(), Err(FsError::Unsupported)));
    }
}
