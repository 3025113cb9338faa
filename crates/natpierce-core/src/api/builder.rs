//! Builder for configuring NatpierceApi initialization.

use crate::config::{InstallPaths, SourceConfig};
use crate::error::{NatpierceError, Result};
use crate::models::HostEvent;
use crate::network::{ArtifactFetcher, HttpFetcher, TlsPolicy};
use crate::process::{CoreSupervisor, ExitCallback, Preflight, PreflightConfig};
use crate::settings::{JsonSettingsStore, Settings, SettingsStore};
use crate::upgrade::{self, HostReloader, InstallContext, SystemctlReloader, UpgradeEngine};
use crate::{platform, ApiState, NatpierceApi};
use futures::FutureExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builder for [`NatpierceApi`].
///
/// Every collaborator has a production default: settings in
/// `<settings_dir>/config.json`, an HTTP fetcher honouring `disable_verify`,
/// and a reloader restarting the host's plugin loader unit.
///
/// # Example
///
/// ```rust,no_run
/// use natpierce_core::{InstallPaths, MemorySettingsStore, NatpierceApi};
/// use std::sync::Arc;
///
/// # async fn run() -> natpierce_core::Result<()> {
/// let api = NatpierceApi::builder(InstallPaths::under(std::path::Path::new("/tmp/np")))
///     .settings_store(Arc::new(MemorySettingsStore::new()))
///     .autostart(false)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct NatpierceApiBuilder {
    paths: InstallPaths,
    settings_store: Option<Arc<dyn SettingsStore>>,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    reloader: Option<Arc<dyn HostReloader>>,
    preflight: PreflightConfig,
    sources: SourceConfig,
    tls: TlsPolicy,
    owner: Option<String>,
    plugin_version: String,
    autostart: bool,
}

impl NatpierceApiBuilder {
    pub fn new(paths: InstallPaths) -> Self {
        Self {
            paths,
            settings_store: None,
            fetcher: None,
            reloader: None,
            preflight: PreflightConfig::default(),
            sources: SourceConfig::default(),
            tls: TlsPolicy::default(),
            owner: None,
            plugin_version: String::new(),
            autostart: true,
        }
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn reloader(mut self, reloader: Arc<dyn HostReloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    pub fn preflight(mut self, config: PreflightConfig) -> Self {
        self.preflight = config;
        self
    }

    pub fn sources(mut self, sources: SourceConfig) -> Self {
        self.sources = sources;
        self
    }

    /// Trust policy for the default HTTP fetcher.
    pub fn tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls = policy;
        self
    }

    /// System user installed files are handed to.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Version of the supervising package, as the host reports it.
    pub fn plugin_version(mut self, version: impl Into<String>) -> Self {
        self.plugin_version = version.into();
        self
    }

    /// Honour the persisted `autostart` setting during `build()`.
    ///
    /// Default: `true`
    pub fn autostart(mut self, enable: bool) -> Self {
        self.autostart = enable;
        self
    }

    /// Build the API: apply setting defaults, prepare the install tree and
    /// start the core if configured to.
    pub async fn build(self) -> Result<NatpierceApi> {
        let store: Arc<dyn SettingsStore> = match self.settings_store {
            Some(store) => store,
            None => Arc::new(JsonSettingsStore::open(self.paths.settings_file())?),
        };
        let settings = Settings::new(store);
        settings.apply_defaults()?;
        info!("Log level set to {}", settings.log_level());

        let fetcher: Arc<dyn ArtifactFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::with_settings(self.tls, settings.clone())?),
        };
        let reloader: Arc<dyn HostReloader> = match self.reloader {
            Some(reloader) => reloader,
            None => Arc::new(SystemctlReloader::default()),
        };

        let paths = self.paths.clone();
        let owner = self.owner.clone();
        let init = tokio::task::spawn_blocking(move || initialize_install(&paths, owner.as_deref()))
            .await
            .map_err(|e| NatpierceError::Other(format!("Install initialisation aborted: {}", e)))?;
        if let Err(e) = init {
            warn!("Install initialisation incomplete: {}", e);
        }

        let supervisor = CoreSupervisor::new(
            self.paths.clone(),
            settings.clone(),
            Preflight::new(self.preflight),
        );
        let engine = UpgradeEngine::new(InstallContext {
            paths: self.paths.clone(),
            sources: self.sources,
            settings: settings.clone(),
            fetcher,
            reloader,
            owner: self.owner,
        });

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        supervisor.set_exit_callback(Some(forward_exit(events.clone())));

        let api = NatpierceApi {
            inner: Arc::new(ApiState {
                paths: self.paths,
                settings,
                supervisor,
                engine,
                plugin_version: self.plugin_version,
                events,
            }),
        };

        if self.autostart && api.inner.settings.autostart() {
            info!("Autostart enabled, starting core");
            if let Err(e) = api.inner.supervisor.start().await {
                error!("Autostart failed: {}", e);
            }
        }

        Ok(api)
    }
}

/// Exit handler publishing a `core_exit` event.
pub(crate) fn forward_exit(events: broadcast::Sender<HostEvent>) -> ExitCallback {
    Arc::new(move |code| {
        let events = events.clone();
        async move {
            debug!("Emitting core_exit ({:?})", code);
            // no subscribers is fine
            let _ = events.send(HostEvent::CoreExit { code });
            Ok(())
        }
        .boxed()
    })
}

/// Make shipped binaries executable and move a legacy `data` directory out
/// of the package into the runtime directory.
fn initialize_install(paths: &InstallPaths, owner: Option<&str>) -> Result<()> {
    let bin_dir = paths.bin_dir();
    if bin_dir.exists() {
        platform::add_mode_recursive(&bin_dir, 0o755)?;
    }

    let legacy = paths.legacy_data_dir();
    if legacy.is_dir() {
        info!(
            "Migrating {} into {}",
            legacy.display(),
            paths.runtime_dir.display()
        );
        upgrade::copy_dir_recursive(&legacy, &paths.runtime_dir)?;
        upgrade::remove_if_exists(&legacy)?;
        if let Some(owner) = owner {
            chown_if_present(&paths.runtime_dir, owner)?;
        }
    }
    Ok(())
}

fn chown_if_present(path: &Path, owner: &str) -> Result<()> {
    if path.exists() {
        platform::chown_recursive(path, owner)?;
    }
    Ok(())
}
