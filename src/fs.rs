//! The `fuser::Filesystem` adapter: translates inode-addressed kernel
//! callbacks into calls against the path-addressed `dir_ops`/`file_ops`/
//! `session_ops` core, via the `ino::InodeTable` bridge.

use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};

use crate::error::to_positive_errno;
use crate::ino::InodeTable;
use crate::meta::NodeType;
use crate::path_util::dirname;
use crate::session_ops::Session;
use crate::{dir_ops, file_ops, session_ops};

const TTL: Duration = Duration::from_secs(1);

pub struct GridMountFs {
    session: Session,
    inodes: InodeTable,
}

impl GridMountFs {
    pub fn new(session: Session) -> GridMountFs {
        GridMountFs { session, inodes: InodeTable::new() }
    }

    fn child_path(&self, parent_ino: u64, name: &OsStr) -> Option<String> {
        self.inodes.child_path(parent_ino, &name.to_string_lossy())
    }
}

fn node_type_to_file_type(node_type: NodeType) -> FileType {
    match node_type {
        NodeType::Directory => FileType::Directory,
        NodeType::File => FileType::RegularFile,
        NodeType::Slink => FileType::Symlink,
    }
}

fn ms_to_systemtime(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH
    }
}

fn systemtime_to_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn to_file_attr(ino: u64, attr: &file_ops::Attr) -> FileAttr {
    let mtime = ms_to_systemtime(attr.mtime_ms);
    let ctime = ms_to_systemtime(attr.ctime_ms);
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: mtime,
        mtime,
        ctime,
        crtime: ctime,
        kind: node_type_to_file_type(attr.node_type),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

impl Filesystem for GridMountFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), std::os::raw::c_int> {
        session_ops::init();
        Ok(())
    }

    fn destroy(&mut self) {
        self.session.local_fs.release_all(true, &self.session.bucket);
        session_ops::destroy();
    }

    fn lookup(&mut self, _req: &Request, parent_ino: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent_ino, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::getattr(&self.session, &path) {
            Ok(attr) => {
                let ino = self.inodes.ino_for(&path);
                reply.entry(&TTL, &to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::getattr(&self.session, &path) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(ino, &attr)),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        if let Some(mode) = mode {
            if let Err(e) = file_ops::chmod(&self.session, &path, mode) {
                reply.error(to_positive_errno(&e));
                return;
            }
        }

        if uid.is_some() || gid.is_some() {
            if let Err(e) = file_ops::chown(&self.session, &path, uid, gid) {
                reply.error(to_positive_errno(&e));
                return;
            }
        }

        if let Some(size) = size {
            let result = match fh {
                Some(handle) => file_ops::ftruncate(&self.session, handle, size),
                None => file_ops::truncate(&self.session, &path, size),
            };
            if let Err(e) = result {
                reply.error(to_positive_errno(&e));
                return;
            }
        }

        if let Some(mtime) = mtime {
            let ms = match mtime {
                TimeOrNow::SpecificTime(t) => systemtime_to_ms(t),
                TimeOrNow::Now => crate::meta::now_ms(),
            };
            if let Err(e) = file_ops::utime(&self.session, &path, ms) {
                reply.error(to_positive_errno(&e));
                return;
            }
        }

        match file_ops::getattr(&self.session, &path) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(ino, &attr)),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn mkdir(&mut self, req: &Request, parent_ino: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let path = match self.child_path(parent_ino, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        if let Err(e) = dir_ops::mkdir(&self.session, &path, mode, req.uid(), req.gid()) {
            reply.error(to_positive_errno(&e));
            return;
        }
        match file_ops::getattr(&self.session, &path) {
            Ok(attr) => {
                let ino = self.inodes.ino_for(&path);
                reply.entry(&TTL, &to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent_ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent_ino, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match dir_ops::rmdir(&self.session, &path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent_ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent_ino, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::unlink(&self.session, &path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn symlink(&mut self, req: &Request<'_>, parent_ino: u64, link_name: &OsStr, target: &std::path::Path, reply: ReplyEntry) {
        let link_path = match self.child_path(parent_ino, link_name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let target = target.to_string_lossy().into_owned();
        if let Err(e) = file_ops::symlink(&self.session, &target, &link_path, req.uid(), req.gid()) {
            reply.error(to_positive_errno(&e));
            return;
        }
        match file_ops::getattr(&self.session, &link_path) {
            Ok(attr) => {
                let ino = self.inodes.ino_for(&link_path);
                reply.entry(&TTL, &to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::readlink(&self.session, &path, libc::PATH_MAX as usize) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::open(&self.session, &path, flags) {
            Ok(file_ops::OpenOutcome::Opened { handle }) => reply.opened(handle, 0),
            Ok(file_ops::OpenOutcome::FallThroughToCreate) => reply.error(libc::ENOENT),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn create(&mut self, req: &Request<'_>, parent_ino: u64, name: &OsStr, mode: u32, _umask: u32, _flags: i32, reply: ReplyCreate) {
        let path = match self.child_path(parent_ino, name) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let handle = match file_ops::create(&self.session, &path, mode, req.uid(), req.gid()) {
            Ok(h) => h,
            Err(e) => {
                reply.error(to_positive_errno(&e));
                return;
            }
        };
        match file_ops::getattr(&self.session, &path) {
            Ok(attr) => {
                let ino = self.inodes.ino_for(&path);
                reply.created(&TTL, &to_file_attr(ino, &attr), 0, handle, 0);
            }
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        handle: u64,
        offset: i64,
        req_size: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let mut buf = vec![0u8; req_size as usize];
        match file_ops::read(&self.session, &path, handle, &mut buf, offset.max(0) as u64, flags) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        handle: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::write(&self.session, &path, handle, data, offset.max(0) as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, handle: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match file_ops::flush(&self.session, &path, handle) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        handle: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(path) = self.inodes.path_of(ino) {
            file_ops::release(&self.session, &path, handle);
        }
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match dir_ops::opendir(&self.session, &path) {
            Ok(handle) => reply.opened(handle, 0),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, handle: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = match self.inodes.path_of(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let mut names = Vec::new();
        if let Err(e) = dir_ops::readdir(&self.session, &path, handle, |name| names.push(name.to_string())) {
            reply.error(to_positive_errno(&e));
            return;
        }

        let mut i = 0i64;
        for name in names {
            if i >= offset {
                let (child_ino, kind) = match name.as_str() {
                    "." => (ino, FileType::Directory),
                    ".." => (self.inodes.ino_for(&dirname(&path)), FileType::Directory),
                    _ => {
                        let child_path = if path == "/" { format!("/{name}") } else { format!("{path}/{name}") };
                        let child_ino = self.inodes.ino_for(&child_path);
                        let kind = match file_ops::getattr(&self.session, &child_path) {
                            Ok(attr) => node_type_to_file_type(attr.node_type),
                            Err(_) => FileType::RegularFile,
                        };
                        (child_ino, kind)
                    }
                };
                if reply.add(child_ino, i + 1, kind, &name) {
                    break;
                }
            }
            i += 1;
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, handle: u64, _flags: i32, reply: ReplyEmpty) {
        match dir_ops::releasedir(&self.session, handle) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let e = dir_ops::fsyncdir().unwrap_err();
        reply.error(to_positive_errno(&e));
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match session_ops::statfs(&self.session) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.bfree,
                stats.bavail,
                stats.files,
                stats.ffree,
                stats.bsize as u32,
                stats.namemax,
                stats.frsize as u32,
            ),
            Err(e) => reply.error(to_positive_errno(&e)),
        }
    }
}
