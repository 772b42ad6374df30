//! Wireless Microphone
//!
//! Waits for a desktop to pair, then streams the default input device to it.
//! Goes back to discovery whenever a session ends.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_wireless_mic::{
    audio::{list_input_devices, CpalSource},
    config::AppConfig,
    session::{SessionController, SessionState},
};

/// Pause before discovery restarts after a session ends
const REDISCOVERY_DELAY: Duration = Duration::from_secs(1);

const STATS_INTERVAL: Duration = Duration::from_secs(5);

const USAGE: &str = "Usage: mic [--config PATH] [--device NAME] [--sensitivity GAIN] [--list-devices]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    device: Option<String>,
    sensitivity: Option<f32>,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().context("--config needs a path")?.into()),
            "--device" => args.device = Some(it.next().context("--device needs a name")?),
            "--sensitivity" => {
                let value = it.next().context("--sensitivity needs a value")?;
                args.sensitivity = Some(value.parse().with_context(|| format!("Invalid sensitivity: {}", value))?);
            }
            "--list-devices" => args.list_devices = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => bail!("Unknown argument: {}\n{}", other, USAGE),
        }
    }

    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    if args.list_devices {
        println!("\n=== Available Input Devices ===");
        for device in list_input_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(sensitivity) = args.sensitivity {
        config.audio.sensitivity = sensitivity;
    }
    if args.device.is_some() {
        config.audio.device = args.device.clone();
    }

    tracing::info!("Starting wireless microphone");
    tracing::info!(
        "Pairing on {}, streaming on {}, sensitivity {:.2}",
        config.network.pairing_bind_addr(),
        config.network.streaming_bind_addr(),
        config.audio.sensitivity
    );

    let source = Arc::new(CpalSource::new(config.audio.device.clone()));
    let controller = SessionController::new(config, source)?;
    let mut states = controller.subscribe();

    controller.start().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats_ticker = tokio::time::interval(STATS_INTERVAL);

    tracing::info!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state == SessionState::Stopped {
                    tracing::info!(
                        "Session ended ({}), restarting discovery",
                        controller
                            .last_stop_reason()
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "unknown".into())
                    );
                    tokio::time::sleep(REDISCOVERY_DELAY).await;
                    controller.start().await?;
                }
            }
            _ = stats_ticker.tick() => {
                if controller.state() == SessionState::Matched {
                    let stats = controller.stream_stats();
                    tracing::info!(
                        "Stats: {} packets, {:.1} KB sent, {} send failures, {} capture drops, latency {:?}",
                        stats.frames_sent,
                        stats.bytes_sent as f64 / 1024.0,
                        stats.send_failures,
                        stats.capture_drops,
                        controller.current_latency()
                    );
                }
            }
        }
    }

    controller.stop().await?;
    Ok(())
}
