//! Shared fixtures for the integration tests: a scripted core binary, a
//! pre-flight that passes on any machine, and in-memory collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use natpierce_core::network::ProgressFn;
use natpierce_core::{
    ArtifactFetcher, CancellationToken, DownloadProgress, HostReloader, InstallPaths,
    NatpierceError, PreflightConfig, Result,
};
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Install layout under a fresh temp dir.
pub struct TestEnv {
    pub dir: TempDir,
    pub paths: InstallPaths,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let paths = InstallPaths::under(dir.path());
        std::fs::create_dir_all(&paths.plugin_dir).unwrap();
        std::fs::create_dir_all(&paths.settings_dir).unwrap();
        Self { dir, paths }
    }

    /// Pre-flight config whose checks pass without privileges.
    pub fn passing_preflight(&self) -> PreflightConfig {
        let sys_module_dir = self.dir.path().join("sys_module");
        std::fs::create_dir_all(sys_module_dir.join("tun")).unwrap();
        let ip_forward_path = self.dir.path().join("ip_forward");
        std::fs::write(&ip_forward_path, "1\n").unwrap();

        PreflightConfig {
            module: "tun".into(),
            sys_module_dir,
            ip_forward_path,
            modinfo_program: PathBuf::from("false"),
            modprobe_program: PathBuf::from("false"),
        }
    }

    /// A core that prints a banner and its port, then runs until signalled.
    pub fn install_long_running_core(&self, version: &str) {
        self.install_core_script(&format!(
            "echo \"  V{version} build info\"\necho \"listening on port $2\"\nexec sleep 30\n"
        ));
    }

    /// A core that prints a banner and exits with `code` shortly after.
    pub fn install_exiting_core(&self, code: i32) {
        self.install_core_script(&format!(
            "echo \"  V1.23 build info\"\nsleep 0.2\nexit {code}\n"
        ));
    }

    fn install_core_script(&self, body: &str) {
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = \"-v\" ]; then echo \"natpierce v1.23\"; exit 0; fi\n{body}"
        );
        write_executable(&self.paths.core_binary(), script.as_bytes());
    }
}

pub fn write_executable(path: &Path, contents: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn mode_of(path: &Path) -> u32 {
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// In-memory fetcher serving registered artifacts.
///
/// With `gated()`, downloads block until [`FakeFetcher::release`] is called
/// (or the download is cancelled).
#[derive(Default)]
pub struct FakeFetcher {
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    text: Mutex<String>,
    json: Mutex<serde_json::Value>,
    text_delay: Mutex<Option<Duration>>,
    gate: Option<Notify>,
    pub downloads: AtomicUsize,
    pub queries: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    pub fn serve(&self, url: impl Into<String>, body: Vec<u8>) {
        self.artifacts.lock().unwrap().insert(url.into(), body);
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }

    pub fn set_json(&self, json: serde_json::Value) {
        *self.json.lock().unwrap() = json;
    }

    pub fn delay_text(&self, delay: Duration) {
        *self.text_delay.lock().unwrap() = Some(delay);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch_text(&self, _url: &str, _timeout: Duration) -> Result<String> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.text_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.text.lock().unwrap().clone())
    }

    async fn fetch_json(&self, _url: &str, _timeout: Duration) -> Result<serde_json::Value> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.json.lock().unwrap().clone())
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = cancel.cancelled() => return Err(NatpierceError::DownloadCancelled),
            }
        }

        let body = self.artifacts.lock().unwrap().get(url).cloned();
        let Some(body) = body else {
            return Err(NatpierceError::DownloadFailed {
                url: url.to_string(),
                message: "HTTP status 404 Not Found".into(),
            });
        };

        let total = body.len() as u64;
        progress(DownloadProgress::new(0, Some(total)));
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, &body).await?;
        progress(DownloadProgress::new(total / 2, Some(total)));
        progress(DownloadProgress::new(total, Some(total)));
        Ok(total)
    }
}

/// Reloader that counts calls and can be told to fail.
#[derive(Default)]
pub struct FakeReloader {
    pub calls: AtomicUsize,
    fail: bool,
}

impl FakeReloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostReloader for FakeReloader {
    async fn reload(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(NatpierceError::ReloadFailed {
                code: Some(1),
                stderr: "Unit plugin_loader.service not found.".into(),
            })
        } else {
            Ok(())
        }
    }
}
