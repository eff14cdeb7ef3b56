// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Human-facing identifier of a shared file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareCode(u32);

impl ShareCode {
    /// Smallest code the allocator hands out
    pub const MIN: u32 = 10_000;
    /// Largest code the allocator hands out
    pub const MAX: u32 = 99_999;

    /// Wrap a raw value. Out-of-range values are allowed for lookups and simply never match.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether the code lies inside the allocatable range
    pub fn is_allocatable(self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShareCode {
    type Err = AppError;

    /// Parse user-entered text. "00000" parses to 0, which never matches a record.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .parse::<u32>()
            .map(Self)
            .map_err(|_| AppError::InvalidCode(trimmed.to_string()))
    }
}

/// A shared file as seen by the rest of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub code: ShareCode,
    /// Original file name including extension
    pub display_name: String,
    /// Opaque retrieval location owned by the blob store
    pub location: String,
}

/// Field set persisted in the record store.
///
/// Field names are the on-store schema; every field may be missing when read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<i64>,
}

impl StoredRecord {
    /// Whether this record carries the given code
    pub fn has_code(&self, code: ShareCode) -> bool {
        self.unique == Some(i64::from(code.value()))
    }
}

impl From<&FileRecord> for StoredRecord {
    fn from(record: &FileRecord) -> Self {
        Self {
            filename: Some(record.display_name.clone()),
            url: Some(record.location.clone()),
            unique: Some(i64::from(record.code.value())),
        }
    }
}

/// Name and location resolved from a code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFile {
    pub display_name: String,
    pub location: String,
}

/// Direction of an in-flight transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
    #[default]
    None,
}

/// Advisory progress notification for an upload or download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub kind: TransferKind,
    pub bytes_transferred: u64,
    /// Zero when the total size is unknown
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completion percentage in `[0, 100]`, or 0 when the total is unknown
    pub fn percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let ratio = self.bytes_transferred as f64 / self.total_bytes as f64;
        (ratio * 100.0).clamp(0.0, 100.0) as f32
    }
}

/// Application settings (frontend-agnostic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Root for the local record file and blob directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Where downloaded files are written
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Upper bound on code draws per upload. None retries until a free code is found.
    #[serde(default)]
    pub max_allocation_attempts: Option<u32>,
    /// Buffered progress notifications before new ones are dropped
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "freeshare", "freeshare")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".freeshare"))
}

fn default_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|d| d.download_dir().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_progress_capacity() -> usize {
    64
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            download_dir: default_download_dir(),
            max_allocation_attempts: None,
            progress_capacity: default_progress_capacity(),
        }
    }
}

impl AppSettings {
    /// Path of the JSON record file inside the data dir
    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("records.json")
    }

    /// Directory holding uploaded blobs
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Error types for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("File not found")]
    NotFound,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Invalid code: {0}")]
    InvalidCode(String),

    #[error("No free code after {0} attempts")]
    AllocationExhausted(u32),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileIo(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}
