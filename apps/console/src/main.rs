use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remote_store::{MemoryStore, RemoteStore, RestStore, RestStoreConfig};
use shared::{
    domain::{HardwareDocument, HardwareStatus, OperatingMode},
    protocol::{paths, NotificationPayload},
};
use sync_engine::{
    config::load_settings_from, load_settings, mapping_store::validate_and_normalize,
    seed_default_mappings, Clock, EngineEvent, EngineHandle, HttpNotifier, LocalExport,
    MissingNotifier, Notifier, Settings, SyncEngine, SystemClock,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ConsoleCommand;

#[derive(Parser, Debug)]
#[command(name = "omnicontrol", about = "Gesture mapping sync console")]
struct Cli {
    /// Config file. Defaults to $OMNICONTROL_CONFIG or ./omnicontrol.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine, log its events and read operator commands from stdin.
    Run,
    /// Write the default mapping to the store.
    Seed {
        /// Replace a mapping that is already there.
        #[arg(long)]
        overwrite: bool,
    },
    /// Save the store's current mapping as a manual export file.
    Export {
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok()),
        None => load_settings(),
    }
    .context("invalid configuration")?;
    info!(settings = ?settings, "console: configuration loaded");

    let store = build_store(&settings);
    match cli.command {
        Command::Run => run(&settings, store).await,
        Command::Seed { overwrite } => {
            if seed_default_mappings(store.as_ref(), overwrite).await? {
                println!("wrote default mappings to {}", paths::MAPPINGS);
            } else {
                println!(
                    "{} already holds a mapping; use --overwrite to replace it",
                    paths::MAPPINGS
                );
            }
            Ok(())
        }
        Command::Export { out_dir } => {
            let export = export_from_store(store.as_ref()).await?;
            let dir = out_dir.unwrap_or_else(|| settings.export_dir.clone());
            let path = save_export(&dir, &export).await?;
            println!("saved {}", path.display());
            Ok(())
        }
    }
}

fn build_store(settings: &Settings) -> Arc<dyn RemoteStore> {
    match &settings.store_url {
        Some(url) => Arc::new(RestStore::new(RestStoreConfig::new(
            url.clone(),
            settings.store_auth.clone(),
        ))),
        None => {
            warn!("console: no store url configured; using an in-process store");
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_notifier(settings: &Settings) -> Result<Arc<dyn Notifier>> {
    match &settings.notify_url {
        Some(url) => {
            let notifier = HttpNotifier::new(
                url.clone(),
                settings.notify_token.clone(),
                settings.notify_envelope.clone(),
                settings.notify_timeout,
            )?;
            info!(
                host = notifier.endpoint().host_str().unwrap_or("-"),
                "console: notifications enabled"
            );
            Ok(Arc::new(notifier))
        }
        None => {
            warn!("console: no notification endpoint configured; changes will not be announced");
            Ok(Arc::new(MissingNotifier))
        }
    }
}

async fn run(settings: &Settings, store: Arc<dyn RemoteStore>) -> Result<()> {
    if settings.seed_on_start {
        seed_default_mappings(store.as_ref(), false).await?;
    }
    let notifier = build_notifier(settings)?;
    let engine = SyncEngine::new(store, notifier).start().await?;
    let mut events = engine.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    println!("{}", commands::HELP);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "console: event log fell behind"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match commands::parse(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => execute(&engine, command, &settings.export_dir).await,
                    Err(message) => println!("{message}"),
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!("console: stdin unreadable: {err}");
                    stdin_open = false;
                }
            },
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn execute(engine: &EngineHandle, command: ConsoleCommand, export_dir: &Path) {
    let outcome = match command {
        ConsoleCommand::Set { gesture, action } => engine.set_action(&gesture, &action).await,
        ConsoleCommand::Mode(mode) => engine.enter_mode(mode).await,
        ConsoleCommand::Sync => engine.force_sync().await,
        ConsoleCommand::Export => match engine.export_local().await {
            Ok(export) => {
                match save_export(export_dir, &export).await {
                    Ok(path) => println!("saved {}", path.display()),
                    Err(err) => error!("console: {err:#}"),
                }
                Ok(())
            }
            Err(err) => Err(err),
        },
        ConsoleCommand::Status => engine
            .snapshot()
            .await
            .map(|snapshot| print!("{}", commands::render_snapshot(&snapshot))),
        ConsoleCommand::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
    };
    if let Err(err) = outcome {
        println!("error: {err}");
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::MappingChanged(mapping) => {
            let bindings: Vec<String> = mapping
                .iter()
                .map(|(gesture, action)| format!("{gesture}={action}"))
                .collect();
            info!(mapping = %bindings.join(" "), "mapping updated");
        }
        EngineEvent::GestureDetected(gesture) => {
            info!(gesture = gesture.as_deref().unwrap_or("-"), "gesture detected")
        }
        EngineEvent::HardwareChanged(hardware) => info!(
            nav = hardware.navigation_enabled,
            left = hardware.primary_active,
            right = hardware.secondary_active,
            "hardware status"
        ),
        EngineEvent::CalibrationChanged(session) => {
            info!(status = ?session.status, progress = session.progress, "calibration")
        }
        EngineEvent::RehabChanged(session) => info!(
            stage = session.stage,
            progress = session.progress,
            noise_reduction = session.noise_reduction,
            "rehabilitation"
        ),
        EngineEvent::ModePending(mode) => info!(mode = %mode, "entering mode"),
        EngineEvent::ModeChanged(mode) => info!(mode = %mode, "mode active"),
        EngineEvent::SyncStatusChanged(status) => info!(status = status.label(), "store sync"),
        EngineEvent::NotificationStatusChanged(status) => {
            info!(status = status.label(), "endpoint")
        }
        EngineEvent::Error(err) => error!(code = ?err.code(), "{err}"),
    }
}

/// Manual export built straight from the store, without starting the engine.
async fn export_from_store(store: &dyn RemoteStore) -> Result<LocalExport> {
    let mapping = validate_and_normalize(&store.get(paths::MAPPINGS).await?).mapping;
    let hardware: HardwareStatus =
        serde_json::from_value::<HardwareDocument>(store.get(paths::HARDWARE).await?)
            .map(Into::into)
            .unwrap_or_default();
    let payload = NotificationPayload::manual_export(
        SystemClock.now_millis(),
        mapping,
        OperatingMode::Mapping,
        hardware,
    );
    Ok(LocalExport::from_payload(&payload)?)
}

async fn save_export(dir: &Path, export: &LocalExport) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create export directory '{}'", dir.display()))?;
    let path = dir.join(&export.file_name);
    tokio::fs::write(&path, &export.bytes)
        .await
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(path)
}
