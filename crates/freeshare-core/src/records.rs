// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Record store backends
//
// MemoryRecordStore keeps records in process.
// JsonRecordStore keeps the same table in a local JSON file shared between processes.

use crate::store::{RecordChange, RecordStore, StoreError, StoreResult};
use crate::types::StoredRecord;
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the change feed before slow subscribers start lagging
const CHANGE_FEED_CAPACITY: usize = 64;

type RecordTable = BTreeMap<String, StoredRecord>;

/// In-process record store
pub struct MemoryRecordStore {
    records: RwLock<RecordTable>,
    changes_tx: broadcast::Sender<RecordChange>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            changes_tx,
        }
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn write(&self, key: &str, record: StoredRecord) -> StoreResult<()> {
        validate_key(key)?;
        self.records
            .write()
            .await
            .insert(key.to_string(), record.clone());

        let _ = self.changes_tx.send(RecordChange {
            key: key.to_string(),
            record,
        });
        Ok(())
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn read_all(&self) -> StoreResult<Vec<(String, StoredRecord)>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn changes(&self) -> broadcast::Receiver<RecordChange> {
        self.changes_tx.subscribe()
    }
}

/// On-disk layout of the record file
#[derive(Default, serde::Serialize, serde::Deserialize)]
struct RecordsFile {
    #[serde(rename = "fileData", default)]
    file_data: RecordTable,
}

/// How often the record file is re-read for writes made by other processes
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// File-backed record store, safe to share between processes.
///
/// Writes take an exclusive lock on `<file>.lock`, merge into the table on
/// disk and replace the file. Reads always go to disk. A background task
/// re-reads the file and reports records changed by any process on the
/// change feed.
pub struct JsonRecordStore {
    file_path: PathBuf,
    /// Last table seen on disk; writes and the poller diff against it
    known: Arc<Mutex<RecordTable>>,
    changes_tx: broadcast::Sender<RecordChange>,
    poller: JoinHandle<()>,
}

impl JsonRecordStore {
    /// Open a record file, creating parent directories. A missing file is an empty store.
    pub async fn open(file_path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_poll_interval(file_path, DEFAULT_POLL_INTERVAL).await
    }

    /// Open a record file, re-reading it every `poll_interval`
    pub async fn open_with_poll_interval(
        file_path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> StoreResult<Self> {
        let file_path = file_path.into();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let records = load_table(&file_path).await?;
        tracing::info!("Loaded {} records from {:?}", records.len(), file_path);

        let (changes_tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let known = Arc::new(Mutex::new(records));
        let poller = tokio::spawn(poll_file(
            file_path.clone(),
            poll_interval,
            known.clone(),
            changes_tx.clone(),
        ));

        Ok(Self {
            file_path,
            known,
            changes_tx,
            poller,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl Drop for JsonRecordStore {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn write(&self, key: &str, record: StoredRecord) -> StoreResult<()> {
        validate_key(key)?;
        let mut known = self.known.lock().await;

        let file_path = self.file_path.clone();
        let owned_key = key.to_string();
        let table = tokio::task::spawn_blocking(move || {
            write_locked(&file_path, owned_key, record)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("Record writer failed: {}", e)))?
        .map_err(|e| StoreError::Rejected(format!("Failed to persist record {}: {}", key, e)))?;

        publish_changes(&mut known, table, &self.changes_tx);
        Ok(())
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredRecord>> {
        Ok(load_table(&self.file_path).await?.remove(key))
    }

    async fn read_all(&self) -> StoreResult<Vec<(String, StoredRecord)>> {
        Ok(load_table(&self.file_path).await?.into_iter().collect())
    }

    fn changes(&self) -> broadcast::Receiver<RecordChange> {
        self.changes_tx.subscribe()
    }
}

/// Read the record file. A missing file is an empty table.
async fn load_table(file_path: &Path) -> StoreResult<RecordTable> {
    match fs::read_to_string(file_path).await {
        Ok(content) => Ok(serde_json::from_str::<RecordsFile>(&content)?.file_data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(StoreError::Unavailable(format!(
            "Failed to read {}: {}",
            file_path.display(),
            e
        ))),
    }
}

/// Insert `record` into the on-disk table while holding the file lock
fn write_locked(file_path: &Path, key: String, record: StoredRecord) -> StoreResult<RecordTable> {
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(file_path.with_extension("json.lock"))?;
    lock_file.lock_exclusive()?;

    let result = merge_and_persist(file_path, key, record);
    let _ = FileExt::unlock(&lock_file);
    result
}

/// Re-read the table, add the record and replace the file through a temporary file
fn merge_and_persist(
    file_path: &Path,
    key: String,
    record: StoredRecord,
) -> StoreResult<RecordTable> {
    let mut table = match std::fs::read_to_string(file_path) {
        Ok(content) => serde_json::from_str::<RecordsFile>(&content)?.file_data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(e.into()),
    };
    table.insert(key, record);

    let content = serde_json::to_string_pretty(&RecordsFile {
        file_data: table.clone(),
    })?;
    let tmp_path = file_path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, file_path)?;
    Ok(table)
}

/// Report every record in `table` that differs from `known`, then remember `table`
fn publish_changes(
    known: &mut RecordTable,
    table: RecordTable,
    changes_tx: &broadcast::Sender<RecordChange>,
) {
    for (key, record) in &table {
        if known.get(key) != Some(record) {
            let _ = changes_tx.send(RecordChange {
                key: key.clone(),
                record: record.clone(),
            });
        }
    }
    *known = table;
}

async fn poll_file(
    file_path: PathBuf,
    poll_interval: Duration,
    known: Arc<Mutex<RecordTable>>,
    changes_tx: broadcast::Sender<RecordChange>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let mut known = known.lock().await;
        match load_table(&file_path).await {
            Ok(table) => publish_changes(&mut known, table, &changes_tx),
            Err(e) => tracing::warn!("Failed to re-read {:?}: {}", file_path, e),
        }
    }
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.contains('/') {
        return Err(StoreError::InvalidKey(format!("{:?}", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::FileDirectory;
    use crate::types::{FileRecord, ShareCode};

    fn record(name: &str, code: i64) -> StoredRecord {
        StoredRecord {
            filename: Some(name.to_string()),
            url: Some(format!("file:///blobs/{}", name)),
            unique: Some(code),
        }
    }

    #[tokio::test]
    async fn test_memory_store_write_read() {
        let store = MemoryRecordStore::new();
        assert!(store.is_empty().await);

        store.write("key-a", record("a.txt", 11111)).await.unwrap();
        store.write("key-b", record("b.txt", 22222)).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(
            store.read("key-a").await.unwrap(),
            Some(record("a.txt", 11111))
        );
        assert_eq!(store.read("missing").await.unwrap(), None);

        let all = store.read_all().await.unwrap();
        assert_eq!(all[0].0, "key-a");
        assert_eq!(all[1].0, "key-b");
    }

    #[tokio::test]
    async fn test_rejects_invalid_keys() {
        let store = MemoryRecordStore::new();
        assert!(matches!(
            store.write("", record("a.txt", 11111)).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.write("a/b", record("a.txt", 11111)).await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_change_feed_reports_writes() {
        let store = MemoryRecordStore::new();
        let mut changes = store.changes();

        store.write("key-a", record("a.txt", 11111)).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, "key-a");
        assert_eq!(change.record.unique, Some(11111));
    }

    #[tokio::test]
    async fn test_json_store_reloads_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("records.json");

        {
            let store = JsonRecordStore::open(&path).await.unwrap();
            store.write("key-a", record("a.txt", 11111)).await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"fileData\""));
        assert!(content.contains("\"unique\": 11111"));

        let reopened = JsonRecordStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.read("key-a").await.unwrap(),
            Some(record("a.txt", 11111))
        );
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            JsonRecordStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_json_openers_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let a = JsonRecordStore::open(&path).await.unwrap();
        let b = JsonRecordStore::open(&path).await.unwrap();
        a.write("key-a", record("a.txt", 11111)).await.unwrap();
        b.write("key-b", record("b.txt", 22222)).await.unwrap();

        // Each opener sees the other's record without reopening
        assert_eq!(a.read_all().await.unwrap().len(), 2);
        assert_eq!(
            b.read("key-a").await.unwrap(),
            Some(record("a.txt", 11111))
        );

        let fresh = FileDirectory::new(Arc::new(JsonRecordStore::open(&path).await.unwrap()));
        assert_eq!(
            fresh.find_by_code(ShareCode::new(11111)).await.unwrap().display_name,
            "a.txt"
        );
        assert_eq!(
            fresh.find_by_code(ShareCode::new(22222)).await.unwrap().display_name,
            "b.txt"
        );
    }

    #[tokio::test]
    async fn test_json_change_feed_reports_other_openers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let watcher_store = JsonRecordStore::open_with_poll_interval(&path, Duration::from_millis(20))
            .await
            .unwrap();
        let watcher = FileDirectory::new(Arc::new(watcher_store));

        let (tx, rx) = async_channel::unbounded();
        let _subscription = watcher.subscribe(ShareCode::new(33333), move |location| {
            let _ = tx.try_send(location);
        });
        assert_eq!(rx.recv().await.unwrap(), None);

        let writer = FileDirectory::new(Arc::new(JsonRecordStore::open(&path).await.unwrap()));
        let shared = FileRecord {
            code: ShareCode::new(33333),
            display_name: "c.txt".to_string(),
            location: "file:///blobs/c.txt".to_string(),
        };
        writer.put("key-c", &shared).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no update within timeout")
            .unwrap();
        assert_eq!(update, Some("file:///blobs/c.txt".to_string()));
        assert!(watcher.find_by_code(ShareCode::new(33333)).await.is_some());
    }
}
