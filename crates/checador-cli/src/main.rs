//! `checador` - attendance kiosk and reservation tools.
//!
//! - `kiosk`: hold one fingerprint reader and show scan results until Ctrl-C
//! - `monitor`: watch reader reservations, or force one free
//! - `readers`: list the readers nobody holds

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checador_core::{
    ReaderId, ReservationListEntry, SessionId, SessionStore, TimeOfDayClassifier,
};
use checador_kiosk::{KioskSession, ScanMachine, ScanState, SessionControl, SessionSnapshot};
use checador_monitor::{MonitorCommand, MonitorEvent, ReservationMonitor};
use checador_network::{HttpRegistry, ReservationClient, StompChannel};

use crate::config::{AppConfig, Overrides};

#[derive(Parser)]
#[command(name = "checador")]
#[command(about = "Fingerprint attendance kiosk", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "CHECADOR_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the reader registry
    #[arg(long, global = true, env = "CHECADOR_REGISTRY_URL")]
    registry_url: Option<String>,

    /// WebSocket URL of the event channel
    #[arg(long, global = true, env = "CHECADOR_CHANNEL_URL")]
    channel_url: Option<String>,

    /// File holding this installation's session id
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve a reader and show scan results until interrupted
    Kiosk {
        /// Reader to hold (defaults to kiosk.reader from the config file)
        #[arg(short, long, value_parser = parse_reader)]
        reader: Option<ReaderId>,

        /// Start in quick mode
        #[arg(short, long)]
        quick: bool,
    },
    /// Show reserved readers, refreshing periodically
    Monitor {
        /// Force release this reader once and exit
        #[arg(long, value_name = "READER", value_parser = parse_reader)]
        release: Option<ReaderId>,
    },
    /// List readers that are free to reserve
    Readers,
}

fn parse_reader(value: &str) -> Result<ReaderId, String> {
    ReaderId::new(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .with_overrides(Overrides {
            registry_url: cli.registry_url,
            channel_url: cli.channel_url,
            session_file: cli.session_file,
        });

    match cli.command {
        Commands::Kiosk { reader, quick } => {
            let Some(reader) = reader.or_else(|| config.kiosk.reader.clone()) else {
                bail!("No reader given: pass --reader or set kiosk.reader in the config file");
            };
            run_kiosk(&config, reader, quick || config.kiosk.quick_mode).await
        }
        Commands::Monitor { release: Some(reader) } => force_release(&config, reader).await,
        Commands::Monitor { release: None } => run_monitor(&config).await,
        Commands::Readers => list_readers(&config).await,
    }
}

fn admin_client(config: &AppConfig) -> Result<ReservationClient<HttpRegistry>> {
    let registry =
        HttpRegistry::new(config.registry.clone()).context("Failed to create registry client")?;
    Ok(ReservationClient::new(registry, SessionId::generate()))
}

async fn run_kiosk(config: &AppConfig, reader: ReaderId, quick_mode: bool) -> Result<()> {
    let store = SessionStore::new(&config.session_file);
    let session_id = store
        .load_or_create()
        .with_context(|| format!("Failed to load session id from {}", store.path().display()))?;
    let registry =
        HttpRegistry::new(config.registry.clone()).context("Failed to create registry client")?;
    let (channel, events) = StompChannel::new(config.channel.clone());

    let machine = ScanMachine::builder(reader.clone())
        .with_settle(config.kiosk.settle)
        .with_classifier(TimeOfDayClassifier::at_hour(config.kiosk.exit_cutoff_hour))
        .with_quick_mode(quick_mode)
        .build();

    info!(reader = %reader, session = %session_id, quick_mode, "Starting kiosk");
    let (mut session, control) = KioskSession::new(
        ReservationClient::new(registry, session_id),
        channel,
        events,
        machine,
    );

    tokio::join!(session.run(), operate(control));

    info!(reader = %reader, "Kiosk stopped");
    Ok(())
}

/// Print status changes and serve operator input until Ctrl-C.
///
/// Input lines: `r` reinitializes after an error, `q` toggles quick mode,
/// `s` shows the recent scans.
async fn operate(control: SessionControl) {
    let mut snapshots = control.watch();
    let mut lines = stdin_lines();
    let mut stdin_open = true;
    let mut last_line = String::new();

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    print_status(&snapshots.borrow_and_update(), &mut last_line);

    loop {
        tokio::select! {
            result = &mut interrupt => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Interrupted, shutting down");
                control.shutdown();
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_status(&snapshot, &mut last_line);
            }
            line = lines.recv(), if stdin_open => match line {
                Some(line) => match line.trim() {
                    "r" => {
                        control.reinitialize();
                    }
                    "q" => {
                        let quick_mode = !control.snapshot().quick_mode;
                        control.set_quick_mode(quick_mode);
                        println!("Quick mode {}", if quick_mode { "on" } else { "off" });
                    }
                    "s" => print_recent(&control.snapshot()),
                    "" => {}
                    other => println!(
                        "Unknown command {other:?} (r = reinitialize, q = quick mode, s = recent scans)"
                    ),
                },
                None => stdin_open = false,
            },
        }
    }
}

/// Forward stdin lines from a detached thread.
///
/// A blocking read cannot be cancelled, so it is kept off the runtime to
/// let the process exit while a read is pending.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_status(snapshot: &SessionSnapshot, last_line: &mut String) {
    let mut line = format!("[{}] {}", snapshot.state, snapshot.status_message());
    if !snapshot.channel_connected && snapshot.state != ScanState::Error {
        line.push_str(" (channel offline)");
    }
    if *last_line != line {
        println!("{line}");
        *last_line = line;
    }
}

fn print_recent(snapshot: &SessionSnapshot) {
    if snapshot.recent_scans.is_empty() {
        println!("No recent scans");
        return;
    }
    for scan in &snapshot.recent_scans {
        println!(
            "{}  {:<8} {}",
            scan.at.with_timezone(&Local).format("%H:%M:%S"),
            scan.action.to_string(),
            scan.subject.name
        );
    }
}

async fn run_monitor(config: &AppConfig) -> Result<()> {
    let mut monitor = ReservationMonitor::new(admin_client(config)?, config.monitor);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();

    let output = async move {
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                _ = &mut interrupt => {
                    let _ = command_tx.send(MonitorCommand::Shutdown);
                    break;
                }
                event = events.recv() => match event {
                    Some(MonitorEvent::Refreshed(entries)) => print_reservations(&entries),
                    Some(MonitorEvent::RefreshFailed(e)) => println!("Refresh failed: {e}"),
                    Some(MonitorEvent::Released(report)) => {
                        println!("Released {}", report.reader);
                    }
                    Some(MonitorEvent::ReleaseFailed { reader, error }) => {
                        println!("Release of {reader} failed: {error}");
                    }
                    None => break,
                },
            }
        }
    };

    tokio::join!(monitor.run(command_rx, event_tx), output);
    Ok(())
}

fn print_reservations(entries: &[ReservationListEntry]) {
    if entries.is_empty() {
        println!("No reserved readers");
        return;
    }
    println!("{:<24} SESSION", "READER");
    for entry in entries {
        println!("{:<24} {}", entry.reader_id.as_str(), entry.session_id);
    }
}

async fn force_release(config: &AppConfig, reader: ReaderId) -> Result<()> {
    let mut monitor = ReservationMonitor::new(admin_client(config)?, config.monitor);
    if let Err(e) = monitor.refresh().await {
        warn!(error = %e, "Could not list reservations before releasing");
    }

    let report = monitor
        .force_release(&reader)
        .await
        .with_context(|| format!("Failed to release {reader}"))?;

    match &report.listed_holder {
        Some(holder) => println!("Released {reader} (was held by {holder})"),
        None => println!("Released {reader}"),
    }
    match report.current_holder {
        Some(Some(holder)) => println!("{reader} is already reserved again by {holder}"),
        Some(None) => {}
        None => println!("Could not confirm that {reader} is free"),
    }
    Ok(())
}

async fn list_readers(config: &AppConfig) -> Result<()> {
    let readers = admin_client(config)?
        .available_readers()
        .await
        .context("Failed to list available readers")?;

    if readers.is_empty() {
        println!("No readers available");
    }
    for reader in readers {
        println!("{reader}");
    }
    Ok(())
}
