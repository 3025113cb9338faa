//! natpierce-ctl - run and maintain a natpierce installation from a shell.
//!
//! `run` supervises the core until interrupted; the other subcommands are
//! one-shot operations against the same installation.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use natpierce_core::{
    InstallPaths, JsonSettingsStore, NatpierceApi, ResourceKind, Settings, SettingsStore,
    UpgradeProgress,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "natpierce-ctl")]
#[command(about = "Supervise and upgrade the natpierce core")]
struct Args {
    /// Installation root (defaults to the user data directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Installed package version, as reported by the host
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    plugin_version: String,

    /// System user installed files are handed to
    #[arg(long)]
    owner: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the core and keep it supervised until Ctrl-C
    Run,
    /// Install `version` of `plugin` or `core`
    Upgrade { resource: String, version: String },
    /// Print the latest available version
    Latest { resource: String },
    /// Print the installed version
    Version { resource: String },
    /// Print whether the core runs and its settings
    Status,
    /// Read or write a persisted setting
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the address of the outbound interface
    Ip,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Get { key: String },
    /// VALUE is parsed as JSON, falling back to a plain string
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let root = match args.root {
        Some(root) => root,
        None => dirs::data_dir()
            .context("No data directory for this user, pass --root")?
            .join("natpierce"),
    };
    let paths = InstallPaths::under(&root);

    let store: Arc<dyn SettingsStore> = Arc::new(
        JsonSettingsStore::open(paths.settings_file()).context("Failed to open settings")?,
    );

    let log_level = if args.debug {
        Level::DEBUG
    } else {
        Settings::new(Arc::clone(&store)).log_level()
    };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Installation root: {}", root.display());

    let supervise = matches!(args.command, Command::Run);
    let mut builder = NatpierceApi::builder(paths)
        .settings_store(store)
        .plugin_version(args.plugin_version)
        .autostart(supervise);
    if let Some(owner) = args.owner {
        builder = builder.owner(owner);
    }
    let api = builder.build().await?;

    match args.command {
        Command::Run => run(&api).await,
        Command::Upgrade { resource, version } => upgrade(&api, &resource, &version).await,
        Command::Latest { resource } => {
            let version = api.get_latest_version(&resource).await;
            if version.is_empty() {
                bail!("No latest version for {}", resource);
            }
            println!("{}", version);
            Ok(())
        }
        Command::Version { resource } => {
            println!("{}", api.get_version(&resource).await);
            Ok(())
        }
        Command::Status => {
            let config = api.get_config().await;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Config { action } => config(&api, action).await,
        Command::Ip => {
            println!("{}", api.get_ip().await);
            Ok(())
        }
    }
}

async fn run(api: &NatpierceApi) -> Result<()> {
    if !api.get_core_status().await {
        let response = api.set_core_status(true).await;
        if let Some(message) = response.error_message() {
            bail!("Failed to start core: {}", message);
        }
    }
    info!("Core running (PID: {:?})", api.supervisor().pid());

    let mut events = api.subscribe_events();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => warn!("{}: {:?}", event.event_name(), event),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} host events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping core");
    api.shutdown().await;
    watcher.abort();
    Ok(())
}

async fn upgrade(api: &NatpierceApi, resource: &str, version: &str) -> Result<()> {
    let kind = ResourceKind::parse(resource)?;
    let mut progress = api.subscribe_progress();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            if event.kind != kind {
                continue;
            }
            match event.progress {
                UpgradeProgress::Percent(p) => eprint!("\rDownloading {}: {:>3}%", kind, p),
                UpgradeProgress::Complete => eprintln!("\rDownloaded {}       ", kind),
            }
        }
    });

    let response = api.upgrade(resource, version).await;
    reporter.abort();

    match response.error_message() {
        Some(message) => {
            error!("Upgrade failed: {}", message);
            bail!("{}", message)
        }
        None => {
            println!("{} upgraded to {}", kind, version);
            Ok(())
        }
    }
}

async fn config(api: &NatpierceApi, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => match api.get_config_value(&key).await {
            Some(value) => println!("{}", value),
            None => bail!("{} is not set", key),
        },
        ConfigAction::Set { key, value } => {
            let value = serde_json::from_str::<serde_json::Value>(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value));
            let response = api.set_config_value(&key, value).await;
            if let Some(message) = response.error_message() {
                bail!("Failed to set {}: {}", key, message);
            }
        }
    }
    Ok(())
}
