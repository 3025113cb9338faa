//! reqwest-backed [`ArtifactFetcher`].

use super::download::stream_to_file;
use super::{ArtifactFetcher, ProgressFn};
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::settings::Settings;
use crate::{NatpierceError, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Certificate trust policy for outgoing requests.
#[derive(Debug, Clone)]
pub struct TlsPolicy {
    /// Extra CA bundle (PEM) trusted in addition to the system roots.
    pub ca_bundle: Option<PathBuf>,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        let bundle = PathBuf::from(NetworkConfig::DEFAULT_CA_BUNDLE);
        Self {
            ca_bundle: bundle.exists().then_some(bundle),
        }
    }
}

/// HTTP fetcher with a verifying and a non-verifying client.
///
/// Which one serves a request is decided per request from the
/// `disable_verify` setting, so toggling it needs no rebuild.
pub struct HttpFetcher {
    verified: Client,
    unverified: Client,
    settings: Option<Settings>,
}

impl HttpFetcher {
    /// Create a fetcher that always verifies certificates.
    pub fn new(policy: TlsPolicy) -> Result<Self> {
        Ok(Self {
            verified: build_client(&policy, true)?,
            unverified: build_client(&policy, false)?,
            settings: None,
        })
    }

    /// Create a fetcher that consults `settings` for the verification toggle.
    pub fn with_settings(policy: TlsPolicy, settings: Settings) -> Result<Self> {
        let mut fetcher = Self::new(policy)?;
        fetcher.settings = Some(settings);
        Ok(fetcher)
    }

    fn client(&self) -> &Client {
        match &self.settings {
            Some(settings) if settings.disable_verify() => {
                warn!("TLS certificate verification is disabled");
                &self.unverified
            }
            _ => &self.verified,
        }
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response> {
        let parsed = url::Url::parse(url).map_err(|e| NatpierceError::Network {
            message: format!("Invalid URL {}: {}", url, e),
            cause: None,
        })?;

        let mut request = self.client().get(parsed);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        debug!("GET {}", url);
        request.send().await.map_err(|e| map_request_error(e, timeout))
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = ensure_success(url, self.get(url, Some(timeout)).await?)?;
        response
            .text()
            .await
            .map_err(|e| map_request_error(e, Some(timeout)))
    }

    async fn fetch_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value> {
        let response = ensure_success(url, self.get(url, Some(timeout)).await?)?;
        response
            .json()
            .await
            .map_err(|e| map_request_error(e, Some(timeout)))
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NatpierceError::DownloadCancelled),
            response = self.get(url, None) => response?,
        };
        let response = ensure_success(url, response)?;
        stream_to_file(url, response, dest, progress, cancel).await
    }
}

fn build_client(policy: &TlsPolicy, verify: bool) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
        .user_agent(NetworkConfig::USER_AGENT);

    if verify {
        if let Some(bundle) = &policy.ca_bundle {
            match load_bundle(bundle) {
                Ok(certs) => {
                    for cert in certs {
                        builder = builder.add_root_certificate(cert);
                    }
                }
                Err(e) => warn!("Ignoring CA bundle {}: {}", bundle.display(), e),
            }
        }
    } else {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| NatpierceError::Network {
        message: format!("Failed to create HTTP client: {}", e),
        cause: None,
    })
}

fn load_bundle(path: &Path) -> Result<Vec<Certificate>> {
    let pem = std::fs::read(path).map_err(|e| NatpierceError::io_with_path(e, path))?;
    Certificate::from_pem_bundle(&pem).map_err(|e| NatpierceError::Config {
        message: format!("Invalid CA bundle {}: {}", path.display(), e),
    })
}

fn ensure_success(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(NatpierceError::DownloadFailed {
            url: url.to_string(),
            message: format!("HTTP status {}", status),
        })
    }
}

fn map_request_error(err: reqwest::Error, timeout: Option<Duration>) -> NatpierceError {
    match timeout {
        Some(timeout) if err.is_timeout() => NatpierceError::Timeout(timeout),
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bundle_is_not_fatal() {
        let policy = TlsPolicy {
            ca_bundle: Some(PathBuf::from("/nonexistent/ca-bundle.crt")),
        };
        assert!(HttpFetcher::new(policy).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let fetcher = HttpFetcher::new(TlsPolicy { ca_bundle: None }).unwrap();
        let err = fetcher
            .fetch_text("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NatpierceError::Network { .. }));
    }

    #[test]
    fn test_disable_verify_selects_unverified_client() {
        let settings = Settings::in_memory();
        let fetcher =
            HttpFetcher::with_settings(TlsPolicy { ca_bundle: None }, settings.clone()).unwrap();
        assert!(std::ptr::eq(fetcher.client(), &fetcher.verified));

        settings
            .set_value(crate::settings::keys::DISABLE_VERIFY, serde_json::json!(true))
            .unwrap();
        assert!(std::ptr::eq(fetcher.client(), &fetcher.unverified));
    }
}
