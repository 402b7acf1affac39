//! Headless relay client - records a video or audio relay stream to disk.
//!
//! Examples:
//!   relay-client video --host 192.168.1.20 --count 1          # single snapshot
//!   relay-client video --output-dir frames --count 300
//!   relay-client audio --output mic.wav --sample-rate 48000 --blocks 430
//!   relay-client audio --format raw --output mic.pcm

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use media_relay::client::{WAV_DATA_SIZE_OFFSET, WAV_RIFF_SIZE_OFFSET};
use media_relay::pcm::DEFAULT_BLOCK_FRAMES;
use media_relay::{wav_header, AudioClient, VideoClient};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Connect to a relay server and save what it streams.
///
/// Connecting displaces any client already attached to the server.
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save JPEG frames from a video server
    Video(VideoArgs),
    /// Record PCM from an audio server
    Audio(AudioArgs),
}

#[derive(Parser, Debug)]
struct VideoArgs {
    /// Server address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 40917)]
    port: u16,

    /// Directory for the numbered JPEG files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// File name prefix
    #[arg(long, default_value = "frame")]
    prefix: String,

    /// Frames to save (0 = until the server closes the stream)
    #[arg(long, default_value_t = 0)]
    count: u64,
}

#[derive(Parser, Debug)]
struct AudioArgs {
    /// Server address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 40918)]
    port: u16,

    /// Output file
    #[arg(long, default_value = "recording.wav")]
    output: PathBuf,

    /// Output container
    #[arg(long, value_enum, default_value_t = AudioFormat::Wav)]
    format: AudioFormat,

    /// Sample rate the server was started with (written to the WAV header)
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Channel count the server was started with
    #[arg(long, default_value_t = 1)]
    channels: u16,

    /// Samples per channel in each block
    #[arg(long, default_value_t = DEFAULT_BLOCK_FRAMES)]
    block_frames: usize,

    /// Blocks to record (0 = until the server closes the stream)
    #[arg(long, default_value_t = 0)]
    blocks: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum AudioFormat {
    /// 16-bit PCM WAV
    Wav,
    /// Headerless little-endian i16 samples, as sent on the wire
    Raw,
}

fn frame_path(args: &VideoArgs, n: u64) -> PathBuf {
    args.output_dir.join(format!("{}_{:06}.jpg", args.prefix, n))
}

async fn record_video(args: VideoArgs, stop: CancellationToken) -> Result<()> {
    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let mut client = VideoClient::connect((args.host.as_str(), args.port)).await?;
    tracing::info!("Connected to video server {}:{}", args.host, args.port);

    let mut saved = 0u64;
    while args.count == 0 || saved < args.count {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = client.read_frame() => frame?,
        };
        let Some(frame) = frame else {
            tracing::info!("Server closed the stream");
            break;
        };
        let path = frame_path(&args, saved);
        tokio::fs::write(&path, &frame)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!("Saved {} ({} bytes)", path.display(), frame.len());
        saved += 1;
    }

    tracing::info!("Saved {} frames to {}", saved, args.output_dir.display());
    Ok(())
}

async fn record_audio(args: AudioArgs, stop: CancellationToken) -> Result<()> {
    let mut client =
        AudioClient::connect((args.host.as_str(), args.port), args.block_frames, args.channels)
            .await?;
    tracing::info!(
        "Connected to audio server {}:{} ({} bytes per block)",
        args.host,
        args.port,
        client.block_bytes()
    );

    let mut file = tokio::fs::File::create(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    if args.format == AudioFormat::Wav {
        file.write_all(&wav_header(args.sample_rate, args.channels, 0)).await?;
    }

    let mut received = 0u64;
    let mut data_len = 0u64;
    while args.blocks == 0 || received < args.blocks {
        let block = tokio::select! {
            _ = stop.cancelled() => break,
            block = client.read_block() => block?,
        };
        let Some(block) = block else {
            tracing::info!("Server closed the stream");
            break;
        };
        file.write_all(&block).await?;
        data_len += block.len() as u64;
        received += 1;
    }

    if args.format == AudioFormat::Wav {
        finish_wav(&mut file, data_len)
            .await
            .with_context(|| format!("Failed to finalize {}", args.output.display()))?;
    }
    file.flush().await?;

    tracing::info!("Recorded {} blocks to {}", received, args.output.display());
    Ok(())
}

/// Patch the RIFF and data sizes once the length is known.
async fn finish_wav(file: &mut tokio::fs::File, data_len: u64) -> Result<()> {
    let Ok(data_len) = u32::try_from(data_len) else {
        anyhow::bail!("recording exceeds the 4 GiB WAV limit");
    };
    let header = wav_header(0, 1, data_len);
    let at = |offset: u64| &header[offset as usize..offset as usize + 4];

    file.seek(SeekFrom::Start(WAV_RIFF_SIZE_OFFSET)).await?;
    file.write_all(at(WAV_RIFF_SIZE_OFFSET)).await?;
    file.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET)).await?;
    file.write_all(at(WAV_DATA_SIZE_OFFSET)).await?;
    file.seek(SeekFrom::End(0)).await?;
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

    let cli = Cli::parse();

    let stop = CancellationToken::new();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Video(args) => record_video(args, stop).await,
        Commands::Audio(args) => record_audio(args, stop).await,
    }
}
