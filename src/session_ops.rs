//! Per-mount session: owns the handle table, the local staging registry,
//! the options snapshot, and the bucket façade. `init`/`destroy` are thin
//! (connection pooling lives inside the `mongodb::Client`); the one piece
//! of real startup work is `load_or_create_root`.

use crate::bucket::BlockingBucket;
use crate::error::FsError;
use crate::handle_table::HandleTable;
use crate::local_fs::LocalFsRegistry;
use crate::meta::{Metadata, NodeType};
use crate::options::Options;

/// Minimum handle issued is `MIN_HANDLE + 1`; `0` is reserved/invalid per
/// spec.md §4.2.
pub const MIN_HANDLE: u64 = 0;

pub struct Session {
    pub options: Options,
    pub bucket: BlockingBucket,
    pub handles: HandleTable,
    pub local_fs: LocalFsRegistry,
}

impl Session {
    pub fn new(options: Options, bucket: BlockingBucket) -> Session {
        let chunk_size = options.mem_chunk_size_bytes;
        let max_size = options.max_mem_file_size();
        Session { options, bucket, handles: HandleTable::with_min_handle(MIN_HANDLE), local_fs: LocalFsRegistry::new(chunk_size, max_size) }
    }
}

/// `init(conn_info)`: no heavy work, connection pooling is external.
pub fn init() {
    log::trace!("init");
}

/// `destroy(token)`: no-op beyond dropping the session.
pub fn destroy() {
    log::trace!("destroy");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Statvfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub namemax: u32,
}

pub fn statfs(session: &Session) -> Result<Statvfs, FsError> {
    let stats = session.bucket.db_stats()?;

    let blocks = stats.file_size;
    let bavail = blocks.saturating_sub(stats.storage_size);

    let mut files = stats.objects;
    let mut ffree = 0u64;
    if blocks > 0 && bavail > 0 {
        let total = (blocks as f64 / (blocks - bavail) as f64 * stats.objects as f64) as u64;
        files = total;
        ffree = total.saturating_sub(stats.objects);
    }

    Ok(Statvfs {
        bsize: 1,
        frsize: 1,
        blocks,
        bfree: bavail,
        bavail,
        files,
        ffree,
        favail: ffree,
        namemax: 1000,
    })
}

/// On startup, find the root directory document; create it with mode
/// `0o700` owned by the running process's effective uid/gid if absent, and
/// re-verify it exists. Failure aborts mount.
pub fn load_or_create_root(session: &Session) -> Result<(), FsError> {
    if let Some(existing) = session.bucket.find_by_filename("/")? {
        if existing.metadata.node_type == Some(NodeType::Directory) {
            log::info!("root directory found, mount bootstrap complete");
            return Ok(());
        }
    }

    log::info!("root directory not found, creating one");
    let uid = unsafe { libc::geteuid() };
    let gid = unsafe { libc::getegid() };
    let now = crate::meta::now_ms();

    let stored = session.bucket.store_blob(&[], "/")?;
    let meta = Metadata::new_for(NodeType::Directory, "/", 0o700 | libc::S_IFDIR as u32, uid, gid, now);
    let matched = session.bucket.update_metadata(stored.id, meta.to_document())?;
    if !matched {
        return Err(FsError::BackendIo("failed to stamp metadata on new root".to_string()));
    }

    let reverify = session.bucket.find_by_filename("/")?;
    match reverify {
        Some(f) if f.metadata.node_type == Some(NodeType::Directory) => {
            log::info!("root directory created");
            Ok(())
        }
        _ => Err(FsError::NotFound("/".to_string())),
    }
}
