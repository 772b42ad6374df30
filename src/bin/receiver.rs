//! Desktop Receiver
//!
//! Finds a microphone on the subnet, keeps it alive and writes its audio to
//! stdout as raw s16le PCM. Logs go to stderr, so the output can be piped
//! straight into a player, e.g. `receiver | aplay -f S16_LE -r 44100 -c 1`.

use anyhow::{bail, Context, Result};
use bytes::{BufMut, BytesMut};
use crossbeam_channel::{bounded, Receiver};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_wireless_mic::{
    config::AppConfig,
    network::{bind_socket, discover, DeviceLink, LinkExit},
    session::RunFlag,
};

/// Decoded batches buffered ahead of the stdout writer
const SINK_CAPACITY: usize = 64;

fn parse_config_path() -> Result<Option<PathBuf>> {
    let mut it = std::env::args().skip(1);
    let mut path = None;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => path = Some(it.next().context("--config needs a path")?.into()),
            other => bail!("Unknown argument: {}\nUsage: receiver [--config PATH]", other),
        }
    }

    Ok(path)
}

/// Write batches to stdout until the channel closes or stdout goes away
fn write_pcm(batches: Receiver<Vec<i16>>) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut buf = BytesMut::new();

    for samples in batches {
        buf.clear();
        buf.reserve(samples.len() * 2);
        for sample in samples {
            buf.put_i16_le(sample);
        }

        if let Err(e) = out.write_all(&buf).and_then(|_| out.flush()) {
            tracing::warn!("Stopped writing audio: {}", e);
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (stdout carries audio)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match parse_config_path()? {
        Some(path) => AppConfig::load_from(&path)?,
        None => AppConfig::load()?,
    };
    let receiver = config.receiver.clone();

    tracing::info!("Starting desktop receiver");

    let flag = RunFlag::new();
    let signal = flag.signal();
    {
        let flag = flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down");
                flag.cancel();
            }
        });
    }

    let (sink, batches) = bounded::<Vec<i16>>(SINK_CAPACITY);
    let writer = thread::Builder::new()
        .name("pcm-writer".to_string())
        .spawn(move || write_pcm(batches))?;

    let pairing = bind_socket(SocketAddr::new(receiver.bind_address, receiver.pairing_port), true)?;

    while signal.is_running() {
        let Some(device) = discover(&pairing, &receiver, &signal).await? else {
            break;
        };

        let mut link = DeviceLink::bind(&receiver, device)?;
        match link.run(&sink, &signal).await {
            LinkExit::Cancelled => {
                link.send_disconnect().await;
                break;
            }
            exit => {
                let stats = link.stats();
                tracing::info!(
                    "Link to {} ended ({:?}) after {} packets, searching again",
                    device,
                    exit,
                    stats.packets
                );
            }
        }
    }

    drop(sink);
    if writer.join().is_err() {
        tracing::error!("PCM writer panicked");
    }
    Ok(())
}
