//! kefctl - command-line controller for KEF network speakers.
//!
//! Thin front end over `kef-core`: it resolves configuration, runs
//! discovery, and drives the speaker controller's public accessors. All
//! state handling and concurrency live in the library.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kef_core::{
    CancellationToken, ControllerConfig, HttpTransport, KefTransport, PlaybackInfo,
    SpeakerController, SpeakerState,
};
use tokio::signal;

use crate::config::CliConfig;

/// kefctl - control KEF network speakers from the command line.
#[derive(Parser, Debug)]
#[command(name = "kefctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (JSON).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "warn", env = "KEFCTL_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Speaker host (overrides config file).
    #[arg(long, env = "KEFCTL_HOST")]
    host: Option<String>,

    /// Speaker API port (overrides config file).
    #[arg(long, env = "KEFCTL_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate a speaker on the network and print its address.
    Discover {
        /// Overall discovery budget in seconds, split between the multicast
        /// probe and the subnet sweep.
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Persist the discovered address to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Connect and print the current speaker state.
    Status {
        /// Print as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Get the volume, or set it when LEVEL is given (0-100, clamped).
    Volume {
        level: Option<u8>,
    },
    /// Step the volume up.
    Up,
    /// Step the volume down.
    Down,
    /// Skip to the next track.
    Next,
    /// Return to the previous track.
    Prev,
    /// Connect and print now-playing updates until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let mut cfg = CliConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host.clone() {
        cfg.speaker_host = Some(host);
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }

    let controller_config = ControllerConfig {
        port: cfg.port,
        volume_step: cfg.volume_step,
        ..Default::default()
    };
    controller_config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let transport: Arc<dyn KefTransport> = Arc::new(HttpTransport::new(
        controller_config.port,
        controller_config.connect_timeout,
    ));

    if let Command::Discover { timeout, save } = args.command {
        let addr = run_discovery(Arc::clone(&transport), Duration::from_secs(timeout)).await?;
        println!("{}", addr);
        if save {
            cfg.speaker_host = Some(addr.host.clone());
            cfg.save(args.config.as_deref())?;
            log::info!("Saved speaker address {}", addr.host);
        }
        return Ok(());
    }

    let host = cfg.speaker_host.clone().context(
        "No speaker host configured. Run `kefctl discover --save` or pass --host/KEFCTL_HOST.",
    )?;

    let controller = SpeakerController::new(Arc::clone(&transport), controller_config);
    controller.set_host(&host);

    match args.command {
        Command::Discover { .. } => unreachable!("handled above"),
        Command::Status { json } => {
            controller.connect().await?;
            // Best-effort: status is still useful without now-playing data.
            let _ = controller.refresh_playback().await;
            let snapshot = controller.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(&snapshot);
            }
        }
        Command::Volume { level: Some(level) } => {
            controller.set_volume(level).await?;
        }
        Command::Volume { level: None } => {
            println!("{}", controller.volume().await?);
        }
        Command::Up => controller.volume_up().await?,
        Command::Down => controller.volume_down().await?,
        Command::Next => controller.next_track().await?,
        Command::Prev => controller.previous_track().await?,
        Command::Watch => watch(&controller).await?,
    }

    controller.close();
    Ok(())
}

/// Runs the dual-strategy discovery engine, cancellable with Ctrl-C.
async fn run_discovery(
    transport: Arc<dyn KefTransport>,
    timeout: Duration,
) -> Result<kef_core::DeviceAddress> {
    let cancel = CancellationToken::new();
    log::info!("Discovering speakers ({}s budget)...", timeout.as_secs());

    let discovery = kef_core::discover(timeout, transport, &cancel);
    tokio::pin!(discovery);

    tokio::select! {
        res = &mut discovery => Ok(res?),
        _ = signal::ctrl_c() => {
            cancel.cancel();
            anyhow::bail!("discovery interrupted");
        }
    }
}

fn print_status(snapshot: &SpeakerState) {
    let host = snapshot.host.as_deref().unwrap_or("-");
    let model = snapshot.model.as_deref().unwrap_or("unknown");
    println!("Speaker:   {} ({})", host, model);
    println!(
        "Connected: {}",
        if snapshot.connected { "yes" } else { "no" }
    );
    println!("Volume:    {}", snapshot.volume);
    if let Some(playback) = &snapshot.playback {
        println!("Playing:   {}", format_now_playing(playback));
    }
    if let Some(error) = &snapshot.last_error {
        println!("Last error: {}", error);
    }
}

fn format_now_playing(playback: &PlaybackInfo) -> String {
    let mut line = String::new();
    if !playback.title.is_empty() {
        line.push_str(&playback.title);
    }
    if !playback.artist.is_empty() {
        if !line.is_empty() {
            line.push_str(" - ");
        }
        line.push_str(&playback.artist);
    }
    if line.is_empty() {
        line.push_str(&playback.state);
    } else if !playback.state.is_empty() {
        line.push_str(&format!(" [{}]", playback.state));
    }
    line
}

/// Connects and prints now-playing changes from the background refresh loop
/// until a shutdown signal arrives.
async fn watch(controller: &SpeakerController) -> Result<()> {
    controller.connect().await?;
    // Seed now-playing before the first tick.
    let _ = controller.refresh_playback().await;

    let snapshot = controller.snapshot();
    log::info!(
        "Connected to {} ({})",
        snapshot.host.as_deref().unwrap_or("-"),
        snapshot.model.as_deref().unwrap_or("unknown")
    );
    println!("Watching speaker state. Press Ctrl-C to stop.");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut last: Option<PlaybackInfo> = None;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let snapshot = controller.snapshot();
                if snapshot.playback != last {
                    if let Some(playback) = &snapshot.playback {
                        println!("[vol {:>3}] {}", snapshot.volume, format_now_playing(playback));
                    }
                    last = snapshot.playback;
                }
            }
        }
    }

    log::info!("Shutdown signal received");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
