// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Shared logic for all frontends
//
// This crate provides:
// - ShareCode, FileRecord, AppSettings and AppError types
// - SettingsStore for persistent settings
// - RecordStore / BlobStore traits with local backends
// - CodeAllocator and FileDirectory binding codes to files
// - ShareService for uploads and downloads
//
// Frontend-specific code lives in separate crates.

pub mod allocator;
pub mod blobs;
pub mod directory;
pub mod download;
pub mod records;
pub mod service;
pub mod settings;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use allocator::CodeAllocator;
pub use blobs::LocalBlobStore;
pub use directory::{FileDirectory, Subscription};
pub use download::{DownloadRequest, Downloader};
pub use records::{JsonRecordStore, MemoryRecordStore};
pub use service::{ShareService, UploadHandle, UploadReceipt};
pub use settings::SettingsStore;
pub use store::{BlobStore, RecordChange, RecordStore, StoreError, StoreResult};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    AppError, AppSettings, FileRecord, ResolvedFile, ShareCode, StoredRecord, TransferKind,
    TransferProgress,
};
