// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - File record directory
//
// Binds share codes to file names and locations on top of a RecordStore.
// Records are keyed by an opaque record key, so resolving a code scans every
// record. A per-process code -> record key cache, filled from scans,
// short-circuits repeat lookups; the scan stays authoritative whenever the cached entry is stale.
//
// Only `put` reports failures. Every read degrades to "not found".

use crate::store::{RecordStore, StoreResult};
use crate::types::{AppError, FileRecord, ResolvedFile, ShareCode, StoredRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Code-based view over the record store
#[derive(Clone)]
pub struct FileDirectory {
    store: Arc<dyn RecordStore>,
    index: Arc<RwLock<HashMap<ShareCode, String>>>,
}

impl FileDirectory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Persist a record under a fresh record key
    pub async fn put(&self, record_key: &str, record: &FileRecord) -> Result<(), AppError> {
        self.store
            .write(record_key, StoredRecord::from(record))
            .await
            .map_err(|e| AppError::Write(e.to_string()))?;

        // The cache is only filled by scans so duplicates resolve in store order
        tracing::info!("Stored record {} for code {}", record_key, record.code);
        Ok(())
    }

    /// Whether any record carries `code`. Store failures count as absent.
    pub async fn exists_by_code(&self, code: ShareCode) -> bool {
        match self.lookup(code).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!("Existence check for code {} failed: {}", code, e);
                false
            }
        }
    }

    /// Resolve a code to its file name and location
    pub async fn find_by_code(&self, code: ShareCode) -> Option<ResolvedFile> {
        let (_, record) = self.lookup_or_log(code).await?;
        let location = record.url?;
        Some(ResolvedFile {
            display_name: record
                .filename
                .unwrap_or_else(|| placeholder_name(code)),
            location,
        })
    }

    /// Location stored for `code`
    pub async fn location_by_code(&self, code: ShareCode) -> Option<String> {
        self.lookup_or_log(code).await.and_then(|(_, r)| r.url)
    }

    /// File name stored for `code`, or `downloaded_file_<code>` when there is none
    pub async fn file_name_by_code(&self, code: ShareCode) -> String {
        self.lookup_or_log(code)
            .await
            .and_then(|(_, r)| r.filename)
            .unwrap_or_else(|| placeholder_name(code))
    }

    /// Extension of the stored file name (text after the last '.')
    pub async fn extension_by_code(&self, code: ShareCode) -> Option<String> {
        let (_, record) = self.lookup_or_log(code).await?;
        record.filename.as_deref().and_then(extension_of)
    }

    /// Watch the location stored for `code`.
    ///
    /// `on_update` fires once with the current location, then whenever a
    /// write changes it. Store failures deliver `None`. Delivery stops when
    /// the returned [`Subscription`] is cancelled or dropped.
    pub fn subscribe<F>(&self, code: ShareCode, on_update: F) -> Subscription
    where
        F: Fn(Option<String>) + Send + 'static,
    {
        // Subscribe before the initial read so no write can slip in between
        let mut changes = self.store.changes();
        let directory = self.clone();

        let task = tokio::spawn(async move {
            let mut current = directory.location_by_code(code).await;
            on_update(current.clone());

            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if !change.record.has_code(code) {
                            continue;
                        }
                        if change.record.url != current {
                            current = change.record.url;
                            on_update(current.clone());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Subscription for code {} skipped {} changes, re-reading",
                            code,
                            skipped
                        );
                        let location = directory.location_by_code(code).await;
                        if location != current {
                            current = location;
                            on_update(current.clone());
                        }
                    }
                    Err(RecvError::Closed) => {
                        tracing::warn!("Change feed closed for code {}", code);
                        on_update(None);
                        break;
                    }
                }
            }
        });

        Subscription { task }
    }

    async fn lookup_or_log(&self, code: ShareCode) -> Option<(String, StoredRecord)> {
        match self.lookup(code).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Lookup for code {} failed: {}", code, e);
                None
            }
        }
    }

    /// Find the record carrying `code`: cached key first, then a full scan
    async fn lookup(&self, code: ShareCode) -> StoreResult<Option<(String, StoredRecord)>> {
        let cached = self.index.read().await.get(&code).cloned();
        if let Some(key) = cached {
            match self.store.read(&key).await? {
                Some(record) if record.has_code(code) => return Ok(Some((key, record))),
                _ => {
                    tracing::debug!("Dropping stale index entry {} for code {}", key, code);
                    self.index.write().await.remove(&code);
                }
            }
        }

        let found = self
            .store
            .read_all()
            .await?
            .into_iter()
            .find(|(_, record)| record.has_code(code));

        if let Some((key, _)) = &found {
            self.index.write().await.insert(code, key.clone());
        }
        Ok(found)
    }
}

/// Handle to a live location subscription. Dropping it stops delivery.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivery
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Whether updates are still being delivered
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn placeholder_name(code: ShareCode) -> String {
    format!("downloaded_file_{}", code)
}

/// Text after the last '.', if there is any
pub(crate) fn extension_of(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}
