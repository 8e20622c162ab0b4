//! The writable staging cache for one open regular file: a chunked in-memory
//! buffer that accumulates writes until `release` flushes it back to the
//! bucket as a single remove-then-store.

use std::sync::Mutex;

use crate::bucket::BlockingBucket;
use crate::error::FsError;
use crate::meta::{Metadata, NodeType};

/// Capability set a local staging backend must provide. `MemoryLocalFile` is
/// the only implementation today; the trait is the seam a disk-backed
/// variant would plug into later.
pub trait LocalFile: Send + Sync {
    fn size(&self) -> u64;
    fn capacity(&self) -> u64;
    fn is_dirty(&self) -> bool;
    fn is_read_only(&self) -> bool;
    fn set_read_only(&self, read_only: bool);

    fn set_size(&self, new_size: u64) -> Result<(), FsError>;
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError>;
    fn write(&self, data: &[u8], offset: u64) -> Result<usize, FsError>;
    fn flush(&self, bucket: &BlockingBucket, filename: &str) -> Result<(), FsError>;
    fn open_remote(&self, bucket: &BlockingBucket, filename: &str) -> Result<(), FsError>;
}

struct Inner {
    chunk_size: usize,
    size: u64,
    chunks: Vec<Vec<u8>>,
    dirty: bool,
    read_only: bool,
}

impl Inner {
    fn capacity(&self) -> u64 {
        (self.chunk_size as u64) * (self.chunks.len() as u64)
    }

    fn grow_to(&mut self, new_size: u64, max_size: u64) -> Result<(), FsError> {
        if new_size <= self.size {
            self.size = new_size;
            self.dirty = true;
            return Ok(());
        }

        if new_size < self.capacity() {
            self.size = new_size;
            self.dirty = true;
            return Ok(());
        }

        if new_size > max_size {
            return Err(FsError::OutOfRange);
        }

        let current_chunks = self.chunks.len() as u64;
        let chunk_size = self.chunk_size as u64;
        let new_chunks = (new_size + chunk_size - 1) / chunk_size;
        if current_chunks > new_chunks {
            return Err(FsError::BackendIo("corrupt chunk accounting".to_string()));
        }

        for _ in current_chunks..new_chunks {
            self.chunks.push(vec![0u8; self.chunk_size]);
        }
        self.size = new_size.min(self.capacity());
        self.dirty = true;
        Ok(())
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let chunk_size = self.chunk_size as u64;
        let mut written = 0usize;
        let mut pos = offset;
        while written < data.len() {
            let which_chunk = (pos / chunk_size) as usize;
            let offset_in_chunk = (pos % chunk_size) as usize;
            let chunk = self
                .chunks
                .get_mut(which_chunk)
                .ok_or_else(|| FsError::BackendIo("write past allocated chunks".to_string()))?;
            let n = (chunk_size as usize - offset_in_chunk).min(data.len() - written);
            chunk[offset_in_chunk..offset_in_chunk + n].copy_from_slice(&data[written..written + n]);
            written += n;
            pos += n as u64;
        }
        self.dirty = true;
        Ok(written)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        if offset >= self.size {
            return Ok(0);
        }
        let chunk_size = self.chunk_size as u64;
        let available = (self.size - offset) as usize;
        let want = buf.len().min(available);
        if want == 0 {
            return Ok(0);
        }

        let mut read = 0usize;
        let mut pos = offset;
        while read < want {
            let which_chunk = (pos / chunk_size) as usize;
            let offset_in_chunk = (pos % chunk_size) as usize;
            let chunk = self
                .chunks
                .get(which_chunk)
                .ok_or_else(|| FsError::BackendIo("read past allocated chunks".to_string()))?;
            let n = (chunk_size as usize - offset_in_chunk).min(want - read);
            buf[read..read + n].copy_from_slice(&chunk[offset_in_chunk..offset_in_chunk + n]);
            read += n;
            pos += n as u64;
        }
        Ok(read)
    }

    fn materialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size as usize);
        let mut pending = self.size as usize;
        for chunk in &self.chunks {
            if pending == 0 {
                break;
            }
            let n = chunk.len().min(pending);
            out.extend_from_slice(&chunk[..n]);
            pending -= n;
        }
        out
    }
}

/// In-memory staging cache for one writable open file. Chunk size is fixed
/// at construction (taken from `Options::mem_chunk_size`, or from the remote
/// file's own chunk size when `enable_dyn_mem_chunk` is set).
pub struct MemoryLocalFile {
    inner: Mutex<Inner>,
    max_size: u64,
}

impl MemoryLocalFile {
    pub fn new(chunk_size: usize, max_size: u64) -> MemoryLocalFile {
        MemoryLocalFile {
            inner: Mutex::new(Inner {
                chunk_size: chunk_size.max(1),
                size: 0,
                chunks: Vec::new(),
                dirty: false,
                read_only: false,
            }),
            max_size,
        }
    }
}

impl LocalFile for MemoryLocalFile {
    fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    fn capacity(&self) -> u64 {
        self.inner.lock().unwrap().capacity()
    }

    fn is_dirty(&self) -> bool {
        self.inner.lock().unwrap().dirty
    }

    fn is_read_only(&self) -> bool {
        self.inner.lock().unwrap().read_only
    }

    fn set_read_only(&self, read_only: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.read_only = read_only;
        if read_only {
            inner.dirty = false;
        }
    }

    fn set_size(&self, new_size: u64) -> Result<(), FsError> {
        let mut inner = self.inner.lock().unwrap();
        let max_size = self.max_size;
        inner.grow_to(new_size, max_size)
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let inner = self.inner.lock().unwrap();
        inner.read_at(buf, offset)
    }

    fn write(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.read_only {
            return Err(FsError::OutOfRange);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let updated_size = offset + data.len() as u64;
        if updated_size > inner.capacity() {
            let max_size = self.max_size;
            inner.grow_to(updated_size, max_size)?;
        } else if updated_size > inner.size {
            inner.size = updated_size;
        }
        inner.write_at(data, offset)
    }

    fn flush(&self, bucket: &BlockingBucket, filename: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.dirty {
            log::debug!("flush skipped, buffer not dirty path={filename}");
            return Ok(());
        }

        let buffer = inner.materialize();

        let existing = bucket
            .find_by_filename(filename)?
            .ok_or_else(|| FsError::NotFound(filename.to_string()))?;
        let captured = existing.metadata.clone();
        let captured_upload_timestamp_ms = existing.upload_timestamp_ms;

        bucket.remove_by_filename(filename)?;
        let stored = bucket.store_blob(&buffer, filename)?;

        let now = crate::meta::now_ms();
        let fresh = Metadata::new_for(NodeType::File, filename, captured.mode, captured.uid, captured.gid, now);
        let matched = bucket.update_metadata(stored.id, fresh.to_document())?;
        if !matched {
            return Err(FsError::NotFound(filename.to_string()));
        }
        bucket.restore_upload_timestamp(stored.id, captured_upload_timestamp_ms)?;

        inner.dirty = false;
        Ok(())
    }

    fn open_remote(&self, bucket: &BlockingBucket, filename: &str) -> Result<(), FsError> {
        let remote = bucket
            .find_by_filename(filename)?
            .ok_or_else(|| FsError::NotFound(filename.to_string()))?;

        if remote.content_length > self.max_size {
            return Err(FsError::OutOfRange);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.grow_to(remote.content_length, self.max_size)?;

        let mut offset = 0u64;
        for index in 0..remote.num_chunks {
            let chunk = bucket.read_chunk(&remote, index)?;
            inner.write_at(&chunk, offset)?;
            offset += chunk.len() as u64;
        }

        inner.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::mock::MockBucket;
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    fn bucket() -> BlockingBucket {
        let runtime = Arc::new(Runtime::new().unwrap());
        BlockingBucket::new(Arc::new(MockBucket::new()), runtime)
    }

    #[test]
    fn capacity_invariant_holds_through_growth() {
        let f = MemoryLocalFile::new(8, 1024);
        f.set_size(20).unwrap();
        assert!(f.capacity() >= f.size());
        assert_eq!(f.capacity() % 8, 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let f = MemoryLocalFile::new(8, 1024);
        f.write(b"hello world", 0).unwrap();
        let mut buf = [0u8; 11];
        let n = f.read(&mut buf, 0).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let f = MemoryLocalFile::new(8, 1024);
        f.write(b"abc", 0).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(f.read(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn shrink_then_grow_preserves_previous_bytes_within_capacity() {
        let f = MemoryLocalFile::new(8, 1024);
        f.write(b"hello world", 0).unwrap();
        f.set_size(5).unwrap();
        assert_eq!(f.size(), 5);
        let mut buf = [0u8; 5];
        f.read(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn growth_beyond_max_size_fails() {
        let f = MemoryLocalFile::new(8, 16);
        assert!(matches!(f.set_size(17), Err(FsError::OutOfRange)));
    }

    #[test]
    fn write_to_read_only_file_fails() {
        let f = MemoryLocalFile::new(8, 1024);
        f.set_read_only(true);
        assert!(matches!(f.write(b"x", 0), Err(FsError::OutOfRange)));
    }

    #[test]
    fn flush_round_trips_through_bucket() {
        let b = bucket();
        b.store_blob(b"", "/f").unwrap();
        b.update_metadata(
            b.find_by_filename("/f").unwrap().unwrap().id,
            crate::meta::Metadata::new_for(NodeType::File, "/f", 0o644, 9, 9, 0).to_document(),
        )
        .unwrap();

        let f = MemoryLocalFile::new(8, 1024);
        f.write(b"hello world", 0).unwrap();
        f.flush(&b, "/f").unwrap();
        assert!(!f.is_dirty());

        let stored = b.find_by_filename("/f").unwrap().unwrap();
        assert_eq!(stored.content_length, 11);
        assert_eq!(stored.metadata.uid, 9);
        assert_eq!(stored.metadata.mode, 0o644);
    }

    #[test]
    fn flush_preserves_original_upload_timestamp() {
        let b = bucket();
        b.store_blob(b"", "/f").unwrap();
        let original = b.find_by_filename("/f").unwrap().unwrap();

        let f = MemoryLocalFile::new(8, 1024);
        f.write(b"hello", 0).unwrap();
        f.flush(&b, "/f").unwrap();

        let stored = b.find_by_filename("/f").unwrap().unwrap();
        assert_eq!(stored.upload_timestamp_ms, original.upload_timestamp_ms);
    }

    #[test]
    fn flush_is_noop_when_not_dirty() {
        let b = bucket();
        let f = MemoryLocalFile::new(8, 1024);
        f.flush(&b, "/missing").unwrap();
    }

    #[test]
    fn open_remote_refuses_oversized_files() {
        let b = bucket();
        b.store_blob(&vec![0u8; 32], "/big").unwrap();
        let f = MemoryLocalFile::new(8, 16);
        assert!(matches!(f.open_remote(&b, "/big"), Err(FsError::OutOfRange)));
    }

    #[test]
    fn open_remote_populates_buffer() {
        let b = bucket();
        b.store_blob(b"hello world", "/f").unwrap();
        let f = MemoryLocalFile::new(8, 1024);
        f.open_remote(&b, "/f").unwrap();
        assert_eq!(f.size(), 11);
        assert!(!f.is_dirty());
        let mut buf = [0u8; 11];
        f.read(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello world");
    }
}
