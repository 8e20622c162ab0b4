//! `getattr`/`fgetattr`, `readlink`, `symlink`, `unlink`, `chmod`, `chown`,
//! `utime`/`utimens`, `truncate`/`ftruncate`, `open`, `create`, `read`,
//! `write`, `flush`, `release`.

use crate::error::FsError;
use crate::meta::{Metadata, NodeType};
use crate::path_util::blocks_512;
use crate::session_ops::Session;

#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub node_type: NodeType,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub ctime_ms: i64,
    pub mtime_ms: i64,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
}

fn is_write_mode(flags: i32) -> bool {
    (flags & libc::O_ACCMODE) != libc::O_RDONLY
}

fn wants_trunc(flags: i32) -> bool {
    (flags & libc::O_TRUNC) != 0
}

fn wants_create(flags: i32) -> bool {
    (flags & libc::O_CREAT) != 0
}

pub fn getattr(session: &Session, path: &str) -> Result<Attr, FsError> {
    log::debug!("getattr path={path}");
    let file = session.bucket.find_by_filename(path)?.ok_or_else(|| FsError::NotFound(path.to_string()))?;
    let meta = &file.metadata;

    let node_type = meta.node_type.unwrap_or_else(|| {
        log::warn!("unrecognized node type for path={path}, treating as regular file");
        NodeType::File
    });

    let mtime_ms = meta.last_updated_ms;
    let nlink = if node_type == NodeType::Directory { 2 } else { 1 };

    let size = match node_type {
        NodeType::Directory => bson::to_vec(&meta.to_document()).map(|v| v.len() as u64).unwrap_or(0),
        NodeType::File => file.content_length,
        NodeType::Slink => match &meta.target {
            Some(t) => t.len() as u64,
            None => {
                log::warn!("symlink missing target path={path}");
                0
            }
        },
    };

    Ok(Attr {
        node_type,
        uid: meta.uid,
        gid: meta.gid,
        mode: meta.mode,
        ctime_ms: file.upload_timestamp_ms,
        mtime_ms,
        nlink,
        size,
        blocks: blocks_512(size),
    })
}

pub fn fgetattr(session: &Session, handle: u64) -> Result<Attr, FsError> {
    let path = session.handles.lookup_path(handle).ok_or(FsError::BadHandle(handle))?;
    getattr(session, &path)
}

pub fn readlink(session: &Session, path: &str, buf_len: usize) -> Result<String, FsError> {
    log::debug!("readlink path={path}");
    if buf_len == 0 {
        return Err(FsError::InvalidArg("readlink buffer length must be > 0".to_string()));
    }
    let file = session.bucket.find_by_filename(path)?.ok_or_else(|| FsError::NotFound(path.to_string()))?;
    match &file.metadata.target {
        Some(target) => {
            let max = buf_len - 1;
            Ok(if target.len() > max { target[..max].to_string() } else { target.clone() })
        }
        None => {
            log::warn!("symlink missing target path={path}");
            Ok(String::new())
        }
    }
}

pub fn symlink(session: &Session, target: &str, link_path: &str, uid: u32, gid: u32) -> Result<(), FsError> {
    log::debug!("symlink target={target} link_path={link_path}");
    let stored = session.bucket.store_blob(&[], link_path)?;
    let now = crate::meta::now_ms();
    let mode = libc::S_IFLNK as u32 | 0o777;
    let meta = Metadata::new_for(NodeType::Slink, link_path, mode, uid, gid, now).with_target(target.to_string());
    session.bucket.update_metadata(stored.id, meta.to_document())?;
    Ok(())
}

pub fn unlink(session: &Session, path: &str) -> Result<(), FsError> {
    log::debug!("unlink path={path}");
    session.bucket.remove_by_filename(path)
}

pub fn chmod(session: &Session, path: &str, mode: u32) -> Result<(), FsError> {
    log::debug!("chmod path={path} mode={mode:o}");
    update_one_field(session, path, "mode", bson::Bson::Int64(mode as i64))
}

pub fn chown(session: &Session, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), FsError> {
    log::debug!("chown path={path} uid={uid:?} gid={gid:?}");
    let mut patch = bson::Document::new();
    if let Some(uid) = uid {
        patch.insert("uid", uid as i64);
    }
    if let Some(gid) = gid {
        patch.insert("gid", gid as i64);
    }
    if patch.is_empty() {
        return Ok(());
    }
    update_document(session, path, patch)
}

pub fn utime(session: &Session, path: &str, mtime_ms: i64) -> Result<(), FsError> {
    log::debug!("utime path={path} mtime_ms={mtime_ms}");
    update_one_field(session, path, "lastUpdated", bson::Bson::DateTime(bson::DateTime::from_millis(mtime_ms)))
}

fn update_one_field(session: &Session, path: &str, key: &str, value: bson::Bson) -> Result<(), FsError> {
    let mut patch = bson::Document::new();
    patch.insert(key, value);
    update_document(session, path, patch)
}

fn update_document(session: &Session, path: &str, patch: bson::Document) -> Result<(), FsError> {
    let file = session.bucket.find_by_filename(path)?.ok_or_else(|| FsError::NotFound(path.to_string()))?;
    let matched = session.bucket.update_metadata(file.id, patch)?;
    if !matched {
        return Err(FsError::NotFound(path.to_string()));
    }
    Ok(())
}

pub fn truncate(session: &Session, path: &str, new_len: u64) -> Result<(), FsError> {
    log::debug!("truncate path={path} new_len={new_len}");
    let local = session.local_fs.find(path).ok_or(FsError::BadHandle(0))?;
    use crate::local_file::LocalFile;
    local.set_size(new_len)
}

pub fn ftruncate(session: &Session, handle: u64, new_len: u64) -> Result<(), FsError> {
    let path = session.handles.lookup_path(handle).ok_or(FsError::BadHandle(handle))?;
    truncate(session, &path, new_len)
}

pub enum OpenOutcome {
    Opened { handle: u64 },
    FallThroughToCreate,
}

/// `open(path, flags)` per spec.md §4.8. When the file does not exist and
/// `O_CREAT` is set, returns `FallThroughToCreate` so the caller (the
/// `fuser` adapter) can invoke [`create`] with the mode it was given.
pub fn open(session: &Session, path: &str, flags: i32) -> Result<OpenOutcome, FsError> {
    log::debug!("open path={path} flags={flags:#x}");
    let handle = session.handles.assign(path)?;

    if session.local_fs.find(path).is_some() {
        return Ok(OpenOutcome::Opened { handle });
    }

    let found = session.bucket.find_by_filename(path)?;
    match &found {
        Some(_) if !is_write_mode(flags) => Ok(OpenOutcome::Opened { handle }),
        Some(remote) => {
            let chunk_size = if session.options.enable_dyn_mem_chunk {
                remote.chunk_size as usize
            } else {
                session.options.mem_chunk_size_bytes
            };
            let local = session.local_fs.create_with_chunk_size(path, chunk_size);
            local.open_remote(&session.bucket, path).map_err(|e| {
                session.local_fs.release(path, &session.bucket);
                e
            })?;
            if wants_trunc(flags) {
                use crate::local_file::LocalFile;
                local.set_size(0)?;
            }
            Ok(OpenOutcome::Opened { handle })
        }
        None if wants_create(flags) => {
            session.handles.release(handle);
            Ok(OpenOutcome::FallThroughToCreate)
        }
        None => {
            session.handles.release(handle);
            Err(FsError::NotFound(path.to_string()))
        }
    }
}

pub fn create(session: &Session, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u64, FsError> {
    log::debug!("create path={path} mode={mode:o}");
    let full_mode = mode | libc::S_IFREG as u32;

    let stored = session.bucket.store_blob(&[], path)?;
    let now = crate::meta::now_ms();
    let meta = Metadata::new_for(NodeType::File, path, full_mode, uid, gid, now);
    if let Err(e) = session.bucket.update_metadata(stored.id, meta.to_document()) {
        let _ = session.bucket.remove_by_filename(path);
        return Err(e);
    }

    let handle = session.handles.assign(path).map_err(|e| {
        let _ = session.bucket.remove_by_filename(path);
        e
    })?;

    session.local_fs.create(path);
    Ok(handle)
}

pub fn read(session: &Session, path: &str, handle: u64, buf: &mut [u8], offset: u64, flags: i32) -> Result<usize, FsError> {
    if session.handles.lookup_path(handle).as_deref() != Some(path) {
        return Err(FsError::BadHandle(handle));
    }

    if let Some(local) = session.local_fs.find(path) {
        use crate::local_file::LocalFile;
        return local.read(buf, offset);
    }

    if is_write_mode(flags) {
        return Err(FsError::BadHandle(handle));
    }

    let file = session.bucket.find_by_filename(path)?.ok_or(FsError::BadHandle(handle))?;
    if offset >= file.content_length {
        return Ok(0);
    }

    let chunk_size = file.chunk_size.max(1) as u64;
    let mut read_total = 0usize;
    let mut chunk_index = (offset / chunk_size) as u32;
    let mut pos = offset;
    while read_total < buf.len() && chunk_index < file.num_chunks {
        let chunk = session.bucket.read_chunk(&file, chunk_index)?;
        let offset_in_chunk = (pos % chunk_size) as usize;
        if offset_in_chunk >= chunk.len() {
            break;
        }
        let n = (chunk.len() - offset_in_chunk).min(buf.len() - read_total);
        buf[read_total..read_total + n].copy_from_slice(&chunk[offset_in_chunk..offset_in_chunk + n]);
        read_total += n;
        pos += n as u64;
        chunk_index += 1;
    }
    Ok(read_total)
}

pub fn write(session: &Session, path: &str, handle: u64, data: &[u8], offset: u64) -> Result<usize, FsError> {
    if session.handles.lookup_path(handle).as_deref() != Some(path) {
        return Err(FsError::BadHandle(handle));
    }
    let local = session.local_fs.find(path).ok_or(FsError::BadHandle(handle))?;
    use crate::local_file::LocalFile;
    local.write(data, offset)
}

pub fn flush(session: &Session, path: &str, handle: u64) -> Result<(), FsError> {
    if session.handles.lookup_path(handle).as_deref() != Some(path) {
        return Err(FsError::BadHandle(handle));
    }
    match session.local_fs.find(path) {
        Some(local) => {
            use crate::local_file::LocalFile;
            local.flush(&session.bucket, path)
        }
        None => Ok(()),
    }
}

/// Always returns 0 (advisory per the kernel contract); flush failures are
/// logged but not propagated.
pub fn release(session: &Session, path: &str, handle: u64) {
    log::debug!("release path={path} handle={handle}");
    if session.handles.lookup_path(handle).is_some() && session.local_fs.find(path).is_some() {
        session.local_fs.release(path, &session.bucket);
    }
    session.handles.release(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::mock::MockBucket;
    use crate::bucket::BlockingBucket;
    use crate::options::Options;
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
            mem_chunk_size_bytes: 64,
            max_mem_file_chunks: 512,
            enable_dyn_mem_chunk: false,
            mountpoint: "/mnt".to_string(),
            auto_unmount: false,
            allow_root: false,
        };
        Session::new(options, bucket)
    }

    #[test]
    fn create_then_write_then_read_round_trips() {
        let s = session();
        let h = create(&s, "/f", 0o644, 1, 1).unwrap();
        write(&s, "/f", h, b"hello world", 0).unwrap();
        release(&s, "/f", h);

        let h2 = match open(&s, "/f", libc::O_RDONLY).unwrap() {
            OpenOutcome::Opened { handle } => handle,
            OpenOutcome::FallThroughToCreate => panic!("expected existing file"),
        };
        let mut buf = [0u8; 11];
        let n = read(&s, "/f", h2, &mut buf, 0, libc::O_RDONLY).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn truncate_smaller_then_flush_updates_remote_size() {
        let s = session();
        let h = create(&s, "/f", 0o644, 1, 1).unwrap();
        write(&s, "/f", h, &vec![7u8; 100], 0).unwrap();
        truncate(&s, "/f", 10).unwrap();
        flush(&s, "/f", h).unwrap();
        release(&s, "/f", h);

        let attr = getattr(&s, "/f").unwrap();
        assert_eq!(attr.size, 10);
    }

    #[test]
    fn open_nonexistent_without_creat_is_not_found() {
        let s = session();
        assert!(matches!(open(&s, "/missing", libc::O_RDONLY), Err(FsError::NotFound(_))));
    }

    #[test]
    fn open_nonexistent_with_creat_falls_through() {
        let s = session();
        match open(&s, "/new", libc::O_WRONLY | libc::O_CREAT).unwrap() {
            OpenOutcome::FallThroughToCreate => {}
            OpenOutcome::Opened { .. } => panic!("expected fall-through"),
        }
    }

    #[test]
    fn symlink_read_round_trips() {
        let s = session();
        symlink(&s, "/target", "/lnk", 1, 1).unwrap();
        let target = readlink(&s, "/lnk", 64).unwrap();
        assert_eq!(target, "/target");
        let attr = getattr(&s, "/lnk").unwrap();
        assert_eq!(attr.node_type, NodeType::Slink);
        assert_eq!(attr.size, 7);
    }

    #[test]
    fn chmod_is_idempotent() {
        let s = session();
        create(&s, "/f", 0o644, 1, 1).unwrap();
        chmod(&s, "/f", 0o600).unwrap();
        chmod(&s, "/f", 0o600).unwrap();
        let attr = getattr(&s, "/f").unwrap();
        assert_eq!(attr.mode & 0o777, 0o600);
    }

    #[test]
    fn chmod_missing_file_is_not_found() {
        let s = session();
        assert!(matches!(chmod(&s, "/missing", 0o600), Err(FsError::NotFound(_))));
    }

    #[test]
    fn read_returns_zero_past_eof_for_readonly_open() {
        let s = session();
        let h = create(&s, "/f", 0o644, 1, 1).unwrap();
        write(&s, "/f", h, b"abc", 0).unwrap();
        release(&s, "/f", h);

        let h2 = match open(&s, "/f", libc::O_RDONLY).unwrap() {
            OpenOutcome::Opened { handle } => handle,
            _ => unreachable!(),
        };
        let mut buf = [0u8; 4];
        assert_eq!(read(&s, "/f", h2, &mut buf, 100, libc::O_RDONLY).unwrap(), 0);
    }

    #[test]
    fn getattr_missing_path_is_not_found() {
        let s = session();
        assert!(matches!(getattr(&s, "/nope"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn getattr_directory_size_is_serialized_metadata_byte_length() {
        let s = session();
        crate::dir_ops::mkdir(&s, "/d", 0o755, 1, 1).unwrap();
        let file = s.bucket.find_by_filename("/d").unwrap().unwrap();
        let expected = bson::to_vec(&file.metadata.to_document()).unwrap().len() as u64;
        let attr = getattr(&s, "/d").unwrap();
        assert_eq!(attr.size, expected);
        assert_ne!(attr.size, file.metadata.to_document().len() as u64);
    }
}
