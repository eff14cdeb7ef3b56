// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Share service
//
// Upload: allocate a code, store the blob, then write the file record.
// Download: resolve an entered code to a DownloadRequest and fetch it.
//
// A record is only written once its blob is stored, and never for a
// cancelled upload.

use crate::allocator::CodeAllocator;
use crate::blobs::LocalBlobStore;
use crate::directory::FileDirectory;
use crate::download::{DownloadRequest, Downloader};
use crate::records::JsonRecordStore;
use crate::store::{BlobSource, BlobStore, RecordStore};
use crate::types::{AppError, AppSettings, FileRecord, ShareCode, TransferKind, TransferProgress};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub code: ShareCode,
    pub record_key: String,
    pub display_name: String,
    pub location: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Uploads and resolves shared files
#[derive(Clone)]
pub struct ShareService {
    directory: FileDirectory,
    blobs: Arc<dyn BlobStore>,
    allocator: Arc<CodeAllocator>,
    progress_capacity: usize,
}

impl ShareService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        allocator: CodeAllocator,
    ) -> Self {
        Self {
            directory: FileDirectory::new(records),
            blobs,
            allocator: Arc::new(allocator),
            progress_capacity: 64,
        }
    }

    /// Service backed by the local record file and blob directory from `settings`
    pub async fn from_settings(settings: &AppSettings) -> Result<Self, AppError> {
        let records = JsonRecordStore::open(settings.records_path())
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to open record store: {}", e)))?;
        let blobs = LocalBlobStore::new(settings.blobs_dir())
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to open blob store: {}", e)))?;
        let allocator = CodeAllocator::new().with_max_attempts(settings.max_allocation_attempts);

        let mut service = Self::new(Arc::new(records), Arc::new(blobs), allocator);
        service.progress_capacity = settings.progress_capacity.max(1);
        Ok(service)
    }

    pub fn directory(&self) -> &FileDirectory {
        &self.directory
    }

    /// Upload `source` as `display_name` and return the code it was shared under
    pub async fn upload(
        &self,
        source: BlobSource,
        display_name: &str,
        total_bytes: Option<u64>,
        progress: Option<&async_channel::Sender<TransferProgress>>,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, AppError> {
        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            code = self.allocator.allocate(&self.directory) => code?,
        };

        let object_name = format!("files/{}.{}", code, storage_extension(display_name));
        tracing::info!("Uploading {} as {} (code {})", display_name, object_name, code);

        let report = |done: u64, total: u64| {
            if let Some(tx) = progress {
                let _ = tx.try_send(TransferProgress {
                    kind: TransferKind::Upload,
                    bytes_transferred: done,
                    total_bytes: total,
                });
            }
        };

        let stored = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.blobs.store(&object_name, source, total_bytes, &report) => Some(result),
        };

        let location = match stored {
            Some(Ok(location)) if !cancel.is_cancelled() => location,
            Some(Ok(_)) | None => {
                tracing::info!("Upload of {} cancelled", display_name);
                self.discard_blob(&object_name).await;
                return Err(AppError::Cancelled);
            }
            Some(Err(e)) => {
                self.discard_blob(&object_name).await;
                return Err(AppError::Write(format!("File upload failed: {}", e)));
            }
        };

        let record = FileRecord {
            code,
            display_name: display_name.to_string(),
            location: location.clone(),
        };
        let record_key = Uuid::new_v4().to_string();

        if let Err(e) = self.directory.put(&record_key, &record).await {
            self.discard_blob(&object_name).await;
            return Err(AppError::Write(format!("File upload failed: {}", e)));
        }

        Ok(UploadReceipt {
            code,
            record_key,
            display_name: record.display_name,
            location,
            uploaded_at: Utc::now(),
        })
    }

    /// Upload a local file under its own file name
    pub async fn upload_file(
        &self,
        path: &Path,
        progress: Option<&async_channel::Sender<TransferProgress>>,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, AppError> {
        let display_name = path
            .file_name()
            .ok_or_else(|| AppError::FileIo("Invalid file path".to_string()))?
            .to_string_lossy()
            .to_string();

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to open file: {}", e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to get file metadata: {}", e)))?
            .len();

        self.upload(Box::new(file), &display_name, Some(size), progress, cancel)
            .await
    }

    /// Run an upload in the background
    pub fn start_upload(&self, path: PathBuf) -> UploadHandle {
        let (progress_tx, progress_rx) = async_channel::bounded(self.progress_capacity);
        let cancel = CancellationToken::new();

        let service = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            service
                .upload_file(&path, Some(&progress_tx), &token)
                .await
        });

        UploadHandle {
            progress_rx,
            cancel,
            task,
        }
    }

    /// Resolve user-entered text to a download request.
    ///
    /// Location and file name come from two separate lookups.
    pub async fn resolve_download(&self, entered_code: &str) -> Result<DownloadRequest, AppError> {
        let code: ShareCode = entered_code.parse()?;

        let location = self
            .directory
            .location_by_code(code)
            .await
            .ok_or(AppError::NotFound)?;
        let file_name = self.directory.file_name_by_code(code).await;

        Ok(DownloadRequest::new(location, file_name))
    }

    /// Resolve `entered_code` and fetch the file into `dest_dir`
    pub async fn download(
        &self,
        downloader: &Downloader,
        entered_code: &str,
        dest_dir: &Path,
        progress: Option<&async_channel::Sender<TransferProgress>>,
    ) -> Result<PathBuf, AppError> {
        let request = self.resolve_download(entered_code).await?;
        downloader.fetch(&request, dest_dir, progress).await
    }

    async fn discard_blob(&self, object_name: &str) {
        if let Err(e) = self.blobs.remove(object_name).await {
            tracing::warn!("Failed to remove partial blob {}: {}", object_name, e);
        }
    }
}

/// Background upload started by [`ShareService::start_upload`]
pub struct UploadHandle {
    progress_rx: async_channel::Receiver<TransferProgress>,
    cancel: CancellationToken,
    task: JoinHandle<Result<UploadReceipt, AppError>>,
}

impl UploadHandle {
    /// Progress notifications. Updates are dropped while the channel is full.
    pub fn progress(&self) -> async_channel::Receiver<TransferProgress> {
        self.progress_rx.clone()
    }

    /// Stop the transfer. No record is written for a cancelled upload.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this upload, for use from other tasks
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the upload to finish
    pub async fn wait(self) -> Result<UploadReceipt, AppError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AppError::Cancelled),
            Err(e) => Err(AppError::Write(format!("Upload task failed: {}", e))),
        }
    }
}

/// Extension used for the stored object name: text after the last '.', or the whole name
fn storage_extension(display_name: &str) -> &str {
    display_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or(display_name)
}
