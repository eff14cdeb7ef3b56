// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Local blob store
//
// Objects are plain files under a root directory, addressed by file:// locations.

use crate::store::{BlobSource, BlobStore, ProgressFn, StoreError, StoreResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Minimum bytes between two progress callbacks
const PROGRESS_STEP_BYTES: u64 = 32 * 1024;

/// Blob store writing objects below a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the store, making sure the root directory exists
    pub async fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StoreError::Unavailable(format!(
                "Failed to create blob directory {}: {}",
                root.display(),
                e
            ))
        })?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object name to a path, rejecting names that escape the root
    fn object_path(&self, object_name: &str) -> StoreResult<PathBuf> {
        if object_name.is_empty()
            || object_name.starts_with('/')
            || object_name.split('/').any(|part| part == ".." || part.is_empty())
        {
            return Err(StoreError::InvalidKey(object_name.to_string()));
        }
        Ok(self.root.join(object_name))
    }
}

/// Local path behind a `file://` location, if it is one
pub fn local_path(location: &str) -> Option<PathBuf> {
    location.strip_prefix("file://").map(PathBuf::from)
}

fn file_location(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(
        &self,
        object_name: &str,
        source: BlobSource,
        total_bytes: Option<u64>,
        progress: ProgressFn<'_>,
    ) -> StoreResult<String> {
        let path = self.object_path(object_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let total = total_bytes.unwrap_or(0);
        let mut file = File::create(&path).await?;
        let mut stream = ReaderStream::new(source);
        let mut written: u64 = 0;
        let mut last_reported: u64 = 0;

        progress(0, total);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if written - last_reported >= PROGRESS_STEP_BYTES {
                last_reported = written;
                progress(written, total);
            }
        }
        file.flush().await?;
        file.sync_all().await?;

        // Always finish with a completion report, even for empty sources
        progress(written, total.max(written));

        tracing::debug!("Stored {} bytes at {:?}", written, path);
        Ok(file_location(&path))
    }

    async fn remove(&self, object_name: &str) -> StoreResult<()> {
        let path = self.object_path(object_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_store_writes_object_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).await.unwrap();

        let data = vec![7u8; 100 * 1024];
        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, total: u64| seen.lock().unwrap().push((done, total));

        let location = store
            .store(
                "files/12345.bin",
                Box::new(std::io::Cursor::new(data.clone())),
                Some(data.len() as u64),
                &progress,
            )
            .await
            .unwrap();

        let path = local_path(&location).unwrap();
        assert!(path.ends_with("files/12345.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), data);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&(0, data.len() as u64)));
        assert_eq!(seen.last(), Some(&(data.len() as u64, data.len() as u64)));
    }

    #[tokio::test]
    async fn test_empty_source_still_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, total: u64| seen.lock().unwrap().push((done, total));

        let location = store
            .store(
                "files/10000.txt",
                Box::new(std::io::Cursor::new(Vec::new())),
                Some(0),
                &progress,
            )
            .await
            .unwrap();

        assert!(std::fs::read(local_path(&location).unwrap())
            .unwrap()
            .is_empty());
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![(0, 0), (0, 0)]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        for name in ["../etc/passwd", "/etc/passwd", "files//x", ""] {
            assert!(matches!(
                store.remove(name).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_remove_missing_object_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        store.remove("files/99999.txt").await.unwrap();
    }
}
