//! Typed view over the free-form `metadata` sub-document GridFS stores
//! alongside each file record, and tolerant conversion to/from `bson::Document`.

use bson::{doc, Bson, DateTime as BsonDateTime, Document};

use crate::path_util::{basename, dirname};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    File,
    Slink,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Directory => "directory",
            NodeType::File => "file",
            NodeType::Slink => "slink",
        }
    }

    pub fn from_str(s: &str) -> Option<NodeType> {
        match s {
            "directory" => Some(NodeType::Directory),
            "file" => Some(NodeType::File),
            "slink" => Some(NodeType::Slink),
            _ => None,
        }
    }

    pub fn mode_bits(self) -> u32 {
        match self {
            NodeType::Directory => libc::S_IFDIR as u32,
            NodeType::File => libc::S_IFREG as u32,
            NodeType::Slink => libc::S_IFLNK as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub node_type: Option<NodeType>,
    pub basename: String,
    pub directory: String,
    pub last_updated_ms: i64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub target: Option<String>,
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Metadata {
    pub fn new_for(node_type: NodeType, path: &str, mode: u32, uid: u32, gid: u32, now: i64) -> Metadata {
        Metadata {
            node_type: Some(node_type),
            basename: basename(path),
            directory: dirname(path),
            last_updated_ms: now,
            uid,
            gid,
            mode,
            target: None,
        }
    }

    pub fn with_target(mut self, target: String) -> Metadata {
        self.target = Some(target);
        self
    }

    /// Decodes a raw metadata sub-document, tolerating missing/unknown fields.
    /// `upload_timestamp_ms` is used as the fallback `last_updated_ms` when
    /// the document carries none.
    pub fn from_document(doc: &Document, upload_timestamp_ms: i64) -> Metadata {
        let node_type = doc
            .get_str("type")
            .ok()
            .and_then(NodeType::from_str)
            .or_else(|| {
                if let Ok(raw) = doc.get_str("type") {
                    log::warn!("unrecognized node type {raw:?} in metadata, treating as unknown");
                }
                None
            });

        let basename = doc.get_str("basename").unwrap_or_default().to_string();
        let directory = doc.get_str("directory").unwrap_or_default().to_string();
        let last_updated_ms = doc
            .get("lastUpdated")
            .and_then(Bson::as_datetime)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(upload_timestamp_ms);
        let uid = get_u32(doc, "uid").unwrap_or(1);
        let gid = get_u32(doc, "gid").unwrap_or(1);
        let mode = get_u32(doc, "mode").unwrap_or(0o555);
        let target = doc.get_str("target").ok().map(|s| s.to_string());

        Metadata {
            node_type,
            basename,
            directory,
            last_updated_ms,
            uid,
            gid,
            mode,
            target,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut d = doc! {
            "basename": self.basename.clone(),
            "directory": self.directory.clone(),
            "lastUpdated": BsonDateTime::from_millis(self.last_updated_ms),
            "uid": self.uid as i64,
            "gid": self.gid as i64,
            "mode": self.mode as i64,
        };
        if let Some(nt) = self.node_type {
            d.insert("type", nt.as_str());
        }
        if let Some(target) = &self.target {
            d.insert("target", target.clone());
        }
        d
    }
}

fn get_u32(doc: &Document, key: &str) -> Option<u32> {
    match doc.get(key) {
        Some(Bson::Int32(v)) => Some(*v as u32),
        Some(Bson::Int64(v)) => Some(*v as u32),
        Some(Bson::Double(v)) => Some(*v as u32),
        _ => None,
    }
}
