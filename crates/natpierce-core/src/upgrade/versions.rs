//! Debounced lookup of the latest available version per resource kind.

use crate::config::{ResourceKind, SourceConfig};
use crate::error::{NatpierceError, Result};
use crate::network::{latest_tag, ArtifactFetcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct VersionQueryRecord {
    version: String,
    resolved_at: Instant,
}

/// Per-kind cache of "latest version" answers.
///
/// A query within the debounce window returns the cached answer without
/// touching the remote source. Failed queries never update the cache.
pub struct VersionQueryCache {
    fetcher: Arc<dyn ArtifactFetcher>,
    sources: SourceConfig,
    records: Mutex<HashMap<ResourceKind, VersionQueryRecord>>,
}

impl VersionQueryCache {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, sources: SourceConfig) -> Self {
        Self {
            fetcher,
            sources,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_latest_version(
        &self,
        kind: ResourceKind,
        timeout: Duration,
        debounce_time: Duration,
    ) -> Result<String> {
        if let Some(cached) = self.cached(kind, debounce_time) {
            debug!("Returning debounced latest {} version {}", kind, cached);
            return Ok(cached);
        }

        let version = tokio::time::timeout(timeout, self.query(kind, timeout))
            .await
            .map_err(|_| NatpierceError::Timeout(timeout))??;

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                kind,
                VersionQueryRecord {
                    version: version.clone(),
                    resolved_at: Instant::now(),
                },
            );
        debug!("Latest {} version: {}", kind, version);
        Ok(version)
    }

    fn cached(&self, kind: ResourceKind, debounce_time: Duration) -> Option<String> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .get(&kind)
            .filter(|record| record.resolved_at.elapsed() < debounce_time)
            .map(|record| record.version.clone())
    }

    async fn query(&self, kind: ResourceKind, timeout: Duration) -> Result<String> {
        let url = kind.latest_version_url(&self.sources);
        let raw = match kind {
            ResourceKind::Core => self.fetcher.fetch_text(&url, timeout).await?,
            ResourceKind::Plugin => {
                let descriptor = self.fetcher.fetch_json(&url, timeout).await?;
                latest_tag(&self.sources.package_repo, descriptor)?
            }
        };
        normalize_version(&raw).ok_or_else(|| NatpierceError::ReleaseNotFound {
            repo: url.clone(),
        })
    }
}

/// Trim and ensure a leading `v`; `None` for an empty answer.
pub fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    (!bare.is_empty()).then(|| format!("v{}", bare))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("1.03\n").as_deref(), Some("v1.03"));
        assert_eq!(normalize_version(" v0.2.1 ").as_deref(), Some("v0.2.1"));
        assert_eq!(normalize_version("V2.0").as_deref(), Some("v2.0"));
        assert_eq!(normalize_version("  "), None);
        assert_eq!(normalize_version("v"), None);
    }
}
