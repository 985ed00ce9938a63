//! Document collection storage.
//!
//! [`CollectionStore`] is the seam the ingestion pipeline, the single-record
//! flow and the duplicate sweep are written against. The SQLite backend keeps
//! one table per collection with each document serialized as JSON.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::Document;

mod sqlite;
#[cfg(test)]
mod tests;

pub use sqlite::SqliteCollectionStore;

/// Store-assigned document id. Strictly increasing in insertion order.
pub type InternalId = i64;

pub const MEMORY_URI: &str = "sqlite::memory:";

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Upper bound on waiting for a locked database.
    pub timeout: Duration,
}

impl ConnectionDescriptor {
    #[cfg(test)]
    pub fn in_memory(database: &str, collection: &str) -> Self {
        Self {
            uri: MEMORY_URI.to_string(),
            database: database.to_string(),
            collection: collection.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    /// The URI with any `user:password@` section masked, safe for logs and reports.
    pub fn redacted_uri(&self) -> String {
        redact_uri(&self.uri)
    }

    pub fn target(&self) -> String {
        format!(
            "{}/{}/{}",
            self.redacted_uri(),
            self.database,
            self.collection
        )
    }
}

pub fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };

    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => uri.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateKey {
    pub key: Value,
    pub count: u64,
}

/// A document skipped by a bulk insert because it collided with a unique key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedDocument {
    /// Position in the submitted batch.
    pub position: usize,
    pub field: Option<String>,
    pub key: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub internal_id: InternalId,
    pub document: Document,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Constraint,
    Insert,
    DuplicateKey,
    InvalidName,
    InvalidKey,
    Codec,
    Backend,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Constraint => "constraint",
            Self::Insert => "insert",
            Self::DuplicateKey => "duplicate_key",
            Self::InvalidName => "invalid_name",
            Self::InvalidKey => "invalid_key",
            Self::Codec => "codec",
            Self::Backend => "backend",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable or refused. Fatal to the current operation.
    #[error("failed to connect to {target}: {reason}")]
    Connection { target: String, reason: String },

    /// Existing documents already violate the requested unique key.
    #[error("cannot enforce unique key on `{field}`: {detail}")]
    Constraint { field: String, detail: String },

    /// Some documents of a bulk insert collided; the others may have been inserted.
    #[error(
        "bulk insert rejected {} document(s), {inserted} inserted",
        .rejected.len()
    )]
    Insert {
        inserted: usize,
        rejected: Vec<RejectedDocument>,
    },

    #[error("a document with {field} = {key} already exists")]
    DuplicateKey { field: String, key: Value },

    #[error("invalid {what} name `{name}`")]
    InvalidName { what: &'static str, name: String },

    #[error("invalid value for key field `{field}`: {key}")]
    InvalidKey { field: String, key: Value },

    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store operation failed: {0}")]
    Backend(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::Insert { .. } => ErrorKind::Insert,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::InvalidName { .. } => ErrorKind::InvalidName,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }
}

/// One named collection inside one named database.
///
/// Calls block until the backend answers; the only bound is the descriptor's
/// timeout. A handle is meant to be owned by a single run at a time.
pub trait CollectionStore: Sized {
    fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, StoreError>;

    /// Deletes every document, then inserts `documents`. The staged load wipes
    /// and inserts separately so each step is reported on its own.
    #[allow(dead_code)]
    fn replace_all(&mut self, documents: &[Document]) -> Result<usize, StoreError>;

    fn delete_all(&mut self) -> Result<usize, StoreError>;

    /// Idempotent. Fails with [`StoreError::Constraint`] when existing documents collide.
    fn ensure_unique_key(&mut self, field: &str) -> Result<(), StoreError>;

    /// Inserts each document independently. Colliding documents are skipped and
    /// reported through [`StoreError::Insert`] after the whole batch was attempted.
    fn insert_many(&mut self, documents: &[Document]) -> Result<usize, StoreError>;

    fn count(&self) -> Result<u64, StoreError>;

    /// Keys shared by more than one document, ordered by key.
    fn find_duplicate_keys(&self, field: &str) -> Result<Vec<DuplicateKey>, StoreError>;

    /// Documents whose `field` equals `key`, ordered by internal id.
    fn find_by_key(&self, field: &str, key: &Value) -> Result<Vec<StoredDocument>, StoreError>;

    fn delete_one_by_internal_id(&mut self, internal_id: InternalId) -> Result<bool, StoreError>;

    fn exists_by_key(&self, field: &str, key: &Value) -> Result<bool, StoreError>;

    fn insert_one(&mut self, document: &Document) -> Result<InternalId, StoreError>;

    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    fn commit_transaction(&mut self) -> Result<(), StoreError>;

    fn rollback_transaction(&mut self) -> Result<(), StoreError>;
}
