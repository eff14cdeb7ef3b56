// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Downloads
//
// A resolved code becomes a DownloadRequest (url, file name, MIME type, headers).
// The Downloader fetches file:// locations from disk and http(s) locations over the network.

use crate::blobs::local_path;
use crate::types::{AppError, TransferKind, TransferProgress};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// User agent sent with HTTP downloads
pub const USER_AGENT: &str = "Mozilla/5.0";

/// Everything needed to fetch a shared file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    /// Build a request, guessing the MIME type from the file name
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();

        Self {
            url: url.into(),
            file_name,
            mime_type,
            headers: vec![("User-Agent".to_string(), USER_AGENT.to_string())],
        }
    }

    /// File name safe to join onto a download directory
    fn target_name(&self) -> String {
        Path::new(&self.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "download".to_string())
    }
}

/// Fetches shared files into a local directory
pub struct Downloader {
    http_client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            // No global timeout, large files can take a while
            .read_timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Fetch `request` into `dest_dir` and return the written path
    pub async fn fetch(
        &self,
        request: &DownloadRequest,
        dest_dir: &Path,
        progress: Option<&async_channel::Sender<TransferProgress>>,
    ) -> Result<PathBuf, AppError> {
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to create download dir: {}", e)))?;
        let dest = dest_dir.join(request.target_name());
        tracing::info!("Downloading {} to {:?}", request.url, dest);

        let result = if let Some(source) = local_path(&request.url) {
            self.fetch_local(&source, &dest, progress).await
        } else if request.url.starts_with("http://") || request.url.starts_with("https://") {
            self.fetch_http(request, &dest, progress).await
        } else {
            Err(AppError::Network(format!(
                "Unsupported location: {}",
                request.url
            )))
        };

        if let Err(e) = &result {
            tracing::error!("Download of {} failed: {}", request.url, e);
            let _ = fs::remove_file(&dest).await;
        }
        result.map(|_| dest)
    }

    async fn fetch_local(
        &self,
        source: &Path,
        dest: &Path,
        progress: Option<&async_channel::Sender<TransferProgress>>,
    ) -> Result<(), AppError> {
        let file = File::open(source)
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to open {}: {}", source.display(), e)))?;
        let total = file.metadata().await.map(|m| m.len()).unwrap_or(0);

        write_stream(Box::pin(ReaderStream::new(file)), dest, total, progress).await
    }

    async fn fetch_http(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        progress: Option<&async_channel::Sender<TransferProgress>>,
    ) -> Result<(), AppError> {
        let mut builder = self.http_client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "Server returned status {}",
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(0);
        write_stream(Box::pin(response.bytes_stream()), dest, total, progress).await
    }
}

/// Drain `stream` into `dest`, reporting download progress after every chunk
async fn write_stream<S, B, E>(
    mut stream: S,
    dest: &Path,
    total: u64,
    progress: Option<&async_channel::Sender<TransferProgress>>,
) -> Result<(), AppError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut file = File::create(dest)
        .await
        .map_err(|e| AppError::FileIo(format!("Failed to create {}: {}", dest.display(), e)))?;
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::Network(format!("Transfer interrupted: {}", e)))?;
        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;

        if let Some(tx) = progress {
            let _ = tx.try_send(TransferProgress {
                kind: TransferKind::Download,
                bytes_transferred: written,
                total_bytes: total,
            });
        }
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_guesses_mime_type() {
        let request = DownloadRequest::new("file:///x", "report.pdf");
        assert_eq!(request.mime_type, "application/pdf");
        assert_eq!(
            request.headers,
            vec![("User-Agent".to_string(), "Mozilla/5.0".to_string())]
        );

        let unknown = DownloadRequest::new("file:///x", "downloaded_file_12345");
        assert_eq!(unknown.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_target_name_strips_directories() {
        assert_eq!(
            DownloadRequest::new("file:///x", "../../etc/passwd").target_name(),
            "passwd"
        );
        assert_eq!(DownloadRequest::new("file:///x", "..").target_name(), "download");
    }

    #[tokio::test]
    async fn test_fetch_local_location() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("54231.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();

        let request = DownloadRequest::new(format!("file://{}", source.display()), "photo.jpg");
        let (tx, rx) = async_channel::unbounded();
        let downloader = Downloader::new().unwrap();

        let dest = downloader
            .fetch(&request, &dir.path().join("downloads"), Some(&tx))
            .await
            .unwrap();

        assert!(dest.ends_with("downloads/photo.jpg"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg bytes");

        let last = rx.try_recv().unwrap();
        assert_eq!(last.kind, TransferKind::Download);
        assert_eq!(last.bytes_transferred, 10);
        assert_eq!(last.total_bytes, 10);
    }

    #[tokio::test]
    async fn test_fetch_rejects_unknown_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let request = DownloadRequest::new("ftp://example.com/file", "file.bin");
        let downloader = Downloader::new().unwrap();

        assert!(matches!(
            downloader.fetch(&request, dir.path(), None).await,
            Err(AppError::Network(_))
        ));
        assert!(!dir.path().join("file.bin").exists());
    }
}
