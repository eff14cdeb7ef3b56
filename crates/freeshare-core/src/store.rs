// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Store abstractions
//
// The record store holds file metadata keyed by opaque record keys.
// The blob store holds file bytes and hands back a retrievable location.

use crate::types::StoredRecord;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;

/// Backend failures reported by record and blob stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A record was written under `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    pub key: String,
    pub record: StoredRecord,
}

/// Keyed store for file metadata records.
///
/// Keys are opaque. There is no index by code: callers that need one scan
/// [`RecordStore::read_all`]. Not transactional across keys.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write a whole record, replacing anything under `key`
    async fn write(&self, key: &str, record: StoredRecord) -> StoreResult<()>;

    /// Read a whole record by key
    async fn read(&self, key: &str) -> StoreResult<Option<StoredRecord>>;

    /// Read every record, in store order
    async fn read_all(&self) -> StoreResult<Vec<(String, StoredRecord)>>;

    /// Feed of writes made after this call
    fn changes(&self) -> broadcast::Receiver<RecordChange>;
}

/// Byte source handed to a blob store
pub type BlobSource = Box<dyn AsyncRead + Send + Unpin>;

/// Progress callback: `(bytes_transferred, total_bytes)`, total is 0 when unknown
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Durable object storage for file contents
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store all bytes from `source` under `object_name` and return a retrievable location.
    ///
    /// Dropping the returned future aborts the transfer; callers should then
    /// [`BlobStore::remove`] the object to discard partial content.
    async fn store(
        &self,
        object_name: &str,
        source: BlobSource,
        total_bytes: Option<u64>,
        progress: ProgressFn<'_>,
    ) -> StoreResult<String>;

    /// Remove an object. Removing a missing object is not an error.
    async fn remove(&self, object_name: &str) -> StoreResult<()>;
}
