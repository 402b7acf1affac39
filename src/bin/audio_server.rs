//! Microphone relay server - streams raw PCM to one TCP client at a time.
//!
//! Audio is sent as little-endian i16 samples in blocks of
//! `--block-frames * --channels` samples, with no header. A new client
//! replaces the current one.
//!
//! Examples:
//!   audio-server
//!   audio-server --device "USB Audio" --sample-rate 48000 --channels 2
//!   audio-server --list-devices

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use media_relay::audio::{list_inputs, AudioConfig, AudioInput, InputSelector};
use media_relay::pcm::DEFAULT_BLOCK_FRAMES;
use media_relay::{AudioSource, RelayError, RelayServerBuilder};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Stream a microphone as raw 16-bit PCM over TCP.
struct Args {
    /// Input device: "default", an index from --list-devices, or a name substring
    #[arg(long, default_value = "default")]
    device: String,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = 40918)]
    port: u16,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Channel count
    #[arg(long, default_value_t = 1)]
    channels: u16,

    /// Samples per channel in each block
    #[arg(long, default_value_t = DEFAULT_BLOCK_FRAMES)]
    block_frames: usize,

    /// Consecutive read errors tolerated before dropping the client
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Listen backlog
    #[arg(long, default_value_t = 3)]
    backlog: u32,

    /// List input devices, then exit
    #[arg(long)]
    list_devices: bool,
}

fn print_devices() -> Result<()> {
    let devices = list_inputs()?;
    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    println!("Input devices:");
    for dev in devices {
        let marker = if dev.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", dev.index, dev.name, marker);
        for range in dev.ranges {
            println!(
                "      {} ch, {}-{} Hz, {}",
                range.channels, range.min_sample_rate, range.max_sample_rate, range.sample_format
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_relay=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        return print_devices();
    }

    if args.channels == 0 || args.block_frames == 0 {
        let msg = "--channels and --block-frames must be positive".to_string();
        return Err(RelayError::Config(msg).into());
    }

    let config = AudioConfig {
        sample_rate: args.sample_rate,
        channels: args.channels,
    };
    let input = AudioInput::open_with(InputSelector::parse(&args.device), config)
        .map_err(|e| RelayError::DeviceOpen(format!("{}: {}", args.device, e)))?;

    let source = AudioSource::new(input, args.block_frames, args.channels);
    tracing::info!(
        "Audio: {} Hz, {} ch, {} frames per block ({} bytes)",
        args.sample_rate,
        args.channels,
        args.block_frames,
        source.block_bytes()
    );

    let server = RelayServerBuilder::new()
        .host(&args.host)
        .port(args.port)
        .backlog(args.backlog)
        .max_capture_failures(args.max_retries)
        .build(source)
        .await
        .context("Failed to start audio server")?;

    tracing::info!("Waiting for connections...");

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    server.run_until(shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["audio-server"]);
        assert_eq!(args.device, "default");
        assert_eq!(args.port, 40918);
        assert_eq!(args.sample_rate, 44100);
        assert_eq!(args.channels, 1);
        assert_eq!(args.block_frames, 1024);
        assert_eq!(args.max_retries, 5);
        assert_eq!(args.backlog, 3);
    }

    #[test]
    fn test_device_by_name() {
        let args = Args::parse_from(["audio-server", "--device", "USB Audio", "--channels", "2"]);
        assert_eq!(
            InputSelector::parse(&args.device),
            InputSelector::Name("USB Audio".to_string())
        );
        assert_eq!(args.channels, 2);
    }
}
