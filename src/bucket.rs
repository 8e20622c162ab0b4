//! The `Bucket` façade: an async trait over a classic GridFS `{prefix}.files`
//! / `{prefix}.chunks` collection pair, plus a synchronous adapter that lets
//! `fuser`'s blocking callbacks drive it via a dedicated Tokio runtime.

use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Binary, Bson, Document};
use futures_util::stream::TryStreamExt;
use mongodb::{Collection, Database};
use tokio::runtime::Runtime;

use crate::error::FsError;
use crate::meta::Metadata;

pub const REMOTE_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct BucketFile {
    pub id: ObjectId,
    pub filename: String,
    pub upload_timestamp_ms: i64,
    pub content_length: u64,
    pub chunk_size: u32,
    pub num_chunks: u32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
    pub file_size: u64,
    pub storage_size: u64,
    pub objects: u64,
}

#[async_trait]
pub trait Bucket: Send + Sync {
    async fn find_by_filename(&self, filename: &str) -> Result<Option<BucketFile>, FsError>;
    async fn list_by_directory(&self, directory: &str) -> Result<Vec<Result<BucketFile, FsError>>, FsError>;
    async fn store_blob(&self, bytes: &[u8], filename: &str) -> Result<BucketFile, FsError>;
    async fn remove_by_filename(&self, filename: &str) -> Result<(), FsError>;
    /// Merges `patch` into the file's `metadata` sub-document. Returns whether a
    /// document matched.
    async fn update_metadata(&self, id: ObjectId, patch: Document) -> Result<bool, FsError>;
    async fn read_chunk(&self, file: &BucketFile, index: u32) -> Result<Vec<u8>, FsError>;
    async fn db_stats(&self) -> Result<DbStats, FsError>;
    /// Overwrites the top-level `uploadDate` field directly (not nested under
    /// `metadata`), used by flush write-back to carry a file's original
    /// upload timestamp forward onto its replacement document.
    async fn restore_upload_timestamp(&self, id: ObjectId, upload_timestamp_ms: i64) -> Result<bool, FsError>;
}

pub struct MongoBucket {
    files: Collection<Document>,
    chunks: Collection<Document>,
    database: Database,
}

impl MongoBucket {
    pub fn new(database: Database, coll_prefix: &str) -> MongoBucket {
        MongoBucket {
            files: database.collection(&format!("{coll_prefix}.files")),
            chunks: database.collection(&format!("{coll_prefix}.chunks")),
            database,
        }
    }

    fn doc_to_file(doc: Document) -> Result<BucketFile, FsError> {
        let id = doc
            .get_object_id("_id")
            .map_err(|_| FsError::BackendIo("file record missing _id".to_string()))?;
        let filename = doc
            .get_str("filename")
            .map_err(|_| FsError::BackendIo("file record missing filename".to_string()))?
            .to_string();
        let upload_timestamp_ms = doc
            .get("uploadDate")
            .and_then(Bson::as_datetime)
            .map(|d| d.timestamp_millis())
            .unwrap_or(0);
        let content_length = doc.get_i64("length").unwrap_or(0).max(0) as u64;
        let chunk_size = doc.get_i32("chunkSize").unwrap_or(REMOTE_CHUNK_SIZE as i32).max(0) as u32;
        let num_chunks = if content_length == 0 || chunk_size == 0 {
            0
        } else {
            ((content_length + chunk_size as u64 - 1) / chunk_size as u64) as u32
        };
        let metadata = doc
            .get_document("metadata")
            .map(|m| Metadata::from_document(m, upload_timestamp_ms))
            .unwrap_or_else(|_| Metadata::from_document(&Document::new(), upload_timestamp_ms));

        Ok(BucketFile {
            id,
            filename,
            upload_timestamp_ms,
            content_length,
            chunk_size,
            num_chunks,
            metadata,
        })
    }
}

#[async_trait]
impl Bucket for MongoBucket {
    async fn find_by_filename(&self, filename: &str) -> Result<Option<BucketFile>, FsError> {
        let found = self
            .files
            .find_one(doc! { "filename": filename }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?;
        found.map(Self::doc_to_file).transpose()
    }

    async fn list_by_directory(&self, directory: &str) -> Result<Vec<Result<BucketFile, FsError>>, FsError> {
        let mut cursor = self
            .files
            .find(doc! { "metadata.directory": directory }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?;
        let mut out = Vec::new();
        loop {
            match cursor.try_next().await {
                Ok(Some(doc)) => out.push(Self::doc_to_file(doc)),
                Ok(None) => break,
                Err(e) => out.push(Err(FsError::BackendIo(e.to_string()))),
            }
        }
        Ok(out)
    }

    async fn store_blob(&self, bytes: &[u8], filename: &str) -> Result<BucketFile, FsError> {
        let id = ObjectId::new();
        let now_ms = crate::meta::now_ms();
        let upload_date = bson::DateTime::from_millis(now_ms);
        let chunk_size = REMOTE_CHUNK_SIZE as u32;

        let mut n: i32 = 0;
        for chunk in bytes.chunks(REMOTE_CHUNK_SIZE) {
            let chunk_doc = doc! {
                "files_id": id,
                "n": n,
                "data": Bson::Binary(Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: chunk.to_vec() }),
            };
            self.chunks
                .insert_one(chunk_doc, None)
                .await
                .map_err(|e| FsError::BackendIo(e.to_string()))?;
            n += 1;
        }

        let file_doc = doc! {
            "_id": id,
            "filename": filename,
            "uploadDate": upload_date,
            "length": bytes.len() as i64,
            "chunkSize": chunk_size as i64,
        };
        self.files
            .insert_one(file_doc, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?;

        Ok(BucketFile {
            id,
            filename: filename.to_string(),
            upload_timestamp_ms: now_ms,
            content_length: bytes.len() as u64,
            chunk_size,
            num_chunks: n.max(0) as u32,
            metadata: Metadata::from_document(&Document::new(), now_ms),
        })
    }

    async fn remove_by_filename(&self, filename: &str) -> Result<(), FsError> {
        if let Some(existing) = self
            .files
            .find_one(doc! { "filename": filename }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?
        {
            let id = existing
                .get_object_id("_id")
                .map_err(|_| FsError::BackendIo("file record missing _id".to_string()))?;
            self.chunks
                .delete_many(doc! { "files_id": id }, None)
                .await
                .map_err(|e| FsError::BackendIo(e.to_string()))?;
            self.files
                .delete_one(doc! { "_id": id }, None)
                .await
                .map_err(|e| FsError::BackendIo(e.to_string()))?;
        }
        Ok(())
    }

    async fn update_metadata(&self, id: ObjectId, patch: Document) -> Result<bool, FsError> {
        let mut set_doc = Document::new();
        for (key, value) in patch {
            set_doc.insert(format!("metadata.{key}"), value);
        }
        let result = self
            .files
            .update_one(doc! { "_id": id }, doc! { "$set": set_doc }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?;
        Ok(result.matched_count > 0)
    }

    async fn read_chunk(&self, file: &BucketFile, index: u32) -> Result<Vec<u8>, FsError> {
        let doc = self
            .chunks
            .find_one(doc! { "files_id": file.id, "n": index as i32 }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?
            .ok_or_else(|| FsError::BackendIo(format!("missing chunk {index} for {}", file.filename)))?;
        match doc.get("data") {
            Some(Bson::Binary(bin)) => Ok(bin.bytes.clone()),
            _ => Err(FsError::BackendIo(format!("malformed chunk {index} for {}", file.filename))),
        }
    }

    async fn db_stats(&self) -> Result<DbStats, FsError> {
        let doc = self
            .database
            .run_command(doc! { "dbStats": 1 }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?;
        let file_size = doc.get_f64("fileSize").or_else(|_| doc.get_i64("fileSize").map(|v| v as f64)).unwrap_or(0.0) as u64;
        let storage_size = doc.get_f64("storageSize").or_else(|_| doc.get_i64("storageSize").map(|v| v as f64)).unwrap_or(0.0) as u64;
        let objects = doc.get_f64("objects").or_else(|_| doc.get_i64("objects").map(|v| v as f64)).unwrap_or(0.0) as u64;
        Ok(DbStats { file_size, storage_size, objects })
    }

    async fn restore_upload_timestamp(&self, id: ObjectId, upload_timestamp_ms: i64) -> Result<bool, FsError> {
        let result = self
            .files
            .update_one(doc! { "_id": id }, doc! { "$set": { "uploadDate": bson::DateTime::from_millis(upload_timestamp_ms) } }, None)
            .await
            .map_err(|e| FsError::BackendIo(e.to_string()))?;
        Ok(result.matched_count > 0)
    }
}

/// Bridges the synchronous `fuser` callbacks to the async `Bucket` trait by
/// driving every call through a dedicated multi-thread Tokio runtime.
pub struct BlockingBucket {
    inner: Arc<dyn Bucket>,
    runtime: Arc<Runtime>,
}

impl BlockingBucket {
    pub fn new(inner: Arc<dyn Bucket>, runtime: Arc<Runtime>) -> BlockingBucket {
        BlockingBucket { inner, runtime }
    }

    pub fn find_by_filename(&self, filename: &str) -> Result<Option<BucketFile>, FsError> {
        self.runtime.block_on(self.inner.find_by_filename(filename))
    }

    pub fn list_by_directory(&self, directory: &str) -> Result<Vec<Result<BucketFile, FsError>>, FsError> {
        self.runtime.block_on(self.inner.list_by_directory(directory))
    }

    pub fn store_blob(&self, bytes: &[u8], filename: &str) -> Result<BucketFile, FsError> {
        self.runtime.block_on(self.inner.store_blob(bytes, filename))
    }

    pub fn remove_by_filename(&self, filename: &str) -> Result<(), FsError> {
        self.runtime.block_on(self.inner.remove_by_filename(filename))
    }

    pub fn update_metadata(&self, id: ObjectId, patch: Document) -> Result<bool, FsError> {
        self.runtime.block_on(self.inner.update_metadata(id, patch))
    }

    pub fn read_chunk(&self, file: &BucketFile, index: u32) -> Result<Vec<u8>, FsError> {
        self.runtime.block_on(self.inner.read_chunk(file, index))
    }

    pub fn db_stats(&self) -> Result<DbStats, FsError> {
        self.runtime.block_on(self.inner.db_stats())
    }

    pub fn restore_upload_timestamp(&self, id: ObjectId, upload_timestamp_ms: i64) -> Result<bool, FsError> {
        self.runtime.block_on(self.inner.restore_upload_timestamp(id, upload_timestamp_ms))
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    struct Entry {
        file: BucketFile,
        chunks: Vec<Vec<u8>>,
    }

    /// In-memory stand-in for a real GridFS bucket, used by the module test
    /// suites that would otherwise need a live MongoDB deployment.
    pub struct MockBucket {
        entries: Mutex<HashMap<String, Entry>>,
        counter: Mutex<u32>,
    }

    impl Default for MockBucket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockBucket {
        pub fn new() -> MockBucket {
            MockBucket { entries: Mutex::new(HashMap::new()), counter: Mutex::new(1) }
        }

        fn fresh_id(&self) -> ObjectId {
            let mut counter = self.counter.lock().unwrap();
            let value = *counter;
            *counter += 1;
            let mut bytes = [0u8; 12];
            bytes[8..12].copy_from_slice(&value.to_be_bytes());
            ObjectId::from_bytes(bytes)
        }
    }

    #[async_trait]
    impl Bucket for MockBucket {
        async fn find_by_filename(&self, filename: &str) -> Result<Option<BucketFile>, FsError> {
            Ok(self.entries.lock().unwrap().get(filename).map(|e| e.file.clone()))
        }

        async fn list_by_directory(&self, directory: &str) -> Result<Vec<Result<BucketFile, FsError>>, FsError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.file.metadata.directory == directory)
                .map(|e| Ok(e.file.clone()))
                .collect())
        }

        async fn store_blob(&self, bytes: &[u8], filename: &str) -> Result<BucketFile, FsError> {
            let id = self.fresh_id();
            let now = crate::meta::now_ms();
            let chunks: Vec<Vec<u8>> = bytes.chunks(REMOTE_CHUNK_SIZE).map(|c| c.to_vec()).collect();
            let file = BucketFile {
                id,
                filename: filename.to_string(),
                upload_timestamp_ms: now,
                content_length: bytes.len() as u64,
                chunk_size: REMOTE_CHUNK_SIZE as u32,
                num_chunks: chunks.len() as u32,
                metadata: Metadata::from_document(&Document::new(), now),
            };
            self.entries.lock().unwrap().insert(filename.to_string(), Entry { file: file.clone(), chunks });
            Ok(file)
        }

        async fn remove_by_filename(&self, filename: &str) -> Result<(), FsError> {
            self.entries.lock().unwrap().remove(filename);
            Ok(())
        }

        async fn update_metadata(&self, id: ObjectId, patch: Document) -> Result<bool, FsError> {
            let mut entries = self.entries.lock().unwrap();
            match entries.values_mut().find(|e| e.file.id == id) {
                Some(entry) => {
                    let mut doc = entry.file.metadata.to_document();
                    for (k, v) in patch {
                        doc.insert(k, v);
                    }
                    entry.file.metadata = Metadata::from_document(&doc, entry.file.upload_timestamp_ms);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn read_chunk(&self, file: &BucketFile, index: u32) -> Result<Vec<u8>, FsError> {
            let entries = self.entries.lock().unwrap();
            let entry = entries
                .values()
                .find(|e| e.file.id == file.id)
                .ok_or_else(|| FsError::NotFound(file.filename.clone()))?;
            entry
                .chunks
                .get(index as usize)
                .cloned()
                .ok_or_else(|| FsError::BackendIo(format!("missing chunk {index}")))
        }

        async fn db_stats(&self) -> Result<DbStats, FsError> {
            let entries = self.entries.lock().unwrap();
            let objects = entries.len() as u64;
            let file_size: u64 = entries.values().map(|e| e.file.content_length).sum();
            Ok(DbStats { file_size, storage_size: file_size / 2 + 1, objects })
        }

        async fn restore_upload_timestamp(&self, id: ObjectId, upload_timestamp_ms: i64) -> Result<bool, FsError> {
            let mut entries = self.entries.lock().unwrap();
            match entries.values_mut().find(|e| e.file.id == id) {
                Some(entry) => {
                    entry.file.upload_timestamp_ms = upload_timestamp_ms;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }
}
