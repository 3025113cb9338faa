//! Streamed download to a temp file with progress and cancellation.

use super::ProgressFn;
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::{NatpierceError, Result};
use futures::StreamExt;
use reqwest::Response;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Progress information for a download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes (if known).
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_downloaded,
            total_bytes,
        }
    }

    /// Whole percent complete (0-100), if the total is known.
    pub fn percent(&self) -> Option<u8> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100
            } else {
                (self.bytes_downloaded.min(total) * 100 / total) as u8
            }
        })
    }
}

/// File name to store a downloaded artifact under.
pub fn artifact_file_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "artifact".to_string())
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Write the body of `response` to `dest` via a `.part` sibling.
pub(super) async fn stream_to_file(
    url: &str,
    response: Response,
    dest: &Path,
    progress: ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| NatpierceError::io_with_path(e, parent))?;
    }

    let temp_path = temp_path_for(dest);
    let result = write_body(url, response, &temp_path, progress, cancel).await;

    match result {
        Ok(bytes) => {
            tokio::fs::rename(&temp_path, dest).await.map_err(|e| {
                let _ = std::fs::remove_file(&temp_path);
                NatpierceError::io_with_path(e, dest)
            })?;
            info!("Downloaded {} bytes to {}", bytes, dest.display());
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(e)
        }
    }
}

async fn write_body(
    url: &str,
    response: Response,
    temp_path: &Path,
    progress: ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let total_bytes = response.content_length();
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| NatpierceError::io_with_path(e, temp_path))?;

    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    progress(DownloadProgress::new(0, total_bytes));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Download of {} cancelled", url);
                return Err(NatpierceError::DownloadCancelled);
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };

        let chunk = chunk.map_err(|e| NatpierceError::Network {
            message: format!("Error reading download stream: {}", e),
            cause: Some(url.to_string()),
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| NatpierceError::io_with_path(e, temp_path))?;

        bytes_downloaded += chunk.len() as u64;
        progress(DownloadProgress::new(bytes_downloaded, total_bytes));
    }

    file.flush()
        .await
        .map_err(|e| NatpierceError::io_with_path(e, temp_path))?;
    file.sync_all()
        .await
        .map_err(|e| NatpierceError::io_with_path(e, temp_path))?;

    Ok(bytes_downloaded)
}
