//! Network layer: artifact fetching over HTTP.
//!
//! The supervisor and upgrade engine only see the [`ArtifactFetcher`] trait;
//! [`HttpFetcher`] is the reqwest-backed default. Tests substitute their own
//! fetchers so nothing here is exercised against the network.

mod client;
mod download;
mod github;

pub use client::{HttpFetcher, TlsPolicy};
pub use download::{artifact_file_name, DownloadProgress};
pub use github::{latest_tag, GitHubRelease};

use crate::cancel::CancellationToken;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Progress callback handed to [`ArtifactFetcher::fetch_to_file`].
pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Retrieves bytes, text and JSON from URLs.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch a small text document.
    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String>;

    /// Fetch and parse a JSON document.
    async fn fetch_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value>;

    /// Stream `url` into `dest`, reporting progress and honouring `cancel`.
    ///
    /// Implementations write to a temporary sibling and only move it to
    /// `dest` once the body is complete, so a failed or cancelled download
    /// never leaves a partial file at `dest`. Returns the byte count.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}
