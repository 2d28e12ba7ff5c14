//! # hack-sound-server daemon
//!
//! CLI entry point: loads configuration and the sound catalog, opens the
//! audio output, claims the well-known bus name, and runs the orchestrator
//! until the last process hold is released.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hack_sound_server::audio::rodio::{AudioOutput, RodioPipelineFactory};
use hack_sound_server::config::{self, Config};
use hack_sound_server::events;
use hack_sound_server::focus::shell::{self, BusNameResolver};
use hack_sound_server::focus::FocusTracker;
use hack_sound_server::metadata::Catalog;
use hack_sound_server::server::{dbus, Server};

#[derive(Parser, Debug)]
#[command(name = "hack-sound-server")]
#[command(about = "Session-scoped sound event daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// System data directory (metadata.json + sounds/)
    #[arg(long)]
    system_data_dir: Option<PathBuf>,

    /// User data directory overriding catalog entries
    #[arg(long)]
    user_data_dir: Option<PathBuf>,

    /// Validate the merged catalog and exit
    #[arg(long)]
    check_metadata: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // HACK_SOUND_SERVER_LOGLEVEL selects verbosity; default is warnings.
    let level = std::env::var("HACK_SOUND_SERVER_LOGLEVEL")
        .map(|raw| config::log_level_directive(&raw))
        .unwrap_or("warn");
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "hack_sound_server={level}"
        )))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(
        args.config.as_deref(),
        args.system_data_dir,
        args.user_data_dir,
    )
    .await?;
    info!(
        "Loaded configuration: system_data_dir={}, user_data_dir={:?}",
        config.system_data_dir.display(),
        config.user_data_dir
    );

    let catalog = Catalog::load(&config.system_data_dir, config.user_data_dir.as_deref());

    if args.check_metadata {
        let problems = catalog.check();
        if problems > 0 {
            anyhow::bail!("{problems} problem(s) found in the sound catalog");
        }
        println!("Sound catalog is clean");
        return Ok(());
    }

    let audio_output = AudioOutput::open()?;
    let factory = Box::new(RodioPipelineFactory::new(audio_output.mixer()));

    let (events_tx, events_rx) = events::channel();
    let server = Server::new(catalog, factory, events_tx.clone(), config.idle_release);

    let connection = dbus::serve(Arc::clone(&server)).await?;
    info!("Acquired {} on the session bus", dbus::BUS_NAME);

    dbus::spawn_name_watcher(connection.clone(), Arc::clone(&server));

    // Focus tracking: shell signals in, settled identities out.
    let resolver = Arc::new(BusNameResolver::new(&connection).await?);
    let (shell_tx, shell_rx) = mpsc::unbounded_channel();
    let tracker = FocusTracker::new(resolver, shell_rx, events_tx, config.focus_inquiry);
    tokio::spawn(tracker.run());
    tokio::spawn({
        let connection = connection.clone();
        async move {
            if let Err(err) = shell::run_shell_watcher(connection, shell_tx).await {
                warn!("Shell focus source unavailable: {err}");
            }
        }
    });

    let event_loop = server.start(events_rx);

    // The last hold goes away when the idle countdown fires with no sounds.
    server.hold().released().await;
    info!("No sounds and the idle timeout expired; shutting down");

    event_loop.abort();
    drop(connection);
    Ok(())
}
