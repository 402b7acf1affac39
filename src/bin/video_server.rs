//! Camera relay server - streams JPEG frames to one TCP client at a time.
//!
//! Each frame is sent as `[4-byte big-endian length][JPEG]`. A new client
//! replaces the current one. With `--serial`, a `'S'` byte on the control
//! port makes the next frame a snapshot at `--snapshot-width`x`--snapshot-height`.
//!
//! Examples:
//!   video-server --device /dev/video0
//!   video-server --device 2 --width 1280 --height 720 --port 5000
//!   video-server --serial /dev/ttyACM0 --snapshot-width 3840 --snapshot-height 2160
//!   video-server --list-devices

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use media_relay::camera::{list_cameras, Camera, JpegCamera};
use media_relay::{RelayError, RelayServerBuilder, VideoSource};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Stream a V4L2 camera as length-prefixed JPEG frames over TCP.
struct Args {
    /// Camera device path or index (N means /dev/videoN)
    #[arg(long, default_value = "/dev/video8")]
    device: String,

    /// Frame width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Requested frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = 40917)]
    port: u16,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 95)]
    quality: u8,

    /// Forward MJPEG frames from the camera without re-encoding
    #[arg(long)]
    mjpeg_passthrough: bool,

    /// Serial control port for snapshot triggers
    #[arg(long)]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115200)]
    baudrate: u32,

    /// Snapshot width
    #[arg(long, default_value_t = 1920)]
    snapshot_width: u32,

    /// Snapshot height
    #[arg(long, default_value_t = 1080)]
    snapshot_height: u32,

    /// Listen backlog
    #[arg(long, default_value_t = 1)]
    backlog: u32,

    /// List cameras and serial ports, then exit
    #[arg(long)]
    list_devices: bool,
}

fn device_path(device: &str) -> String {
    match device.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => device.to_string(),
    }
}

fn print_devices() {
    println!("Cameras:");
    match list_cameras() {
        Ok(cameras) if cameras.is_empty() => println!("  (none found)"),
        Ok(cameras) => {
            for cam in cameras {
                println!("  [{}] {} ({})", cam.index, cam.name, cam.path.display());
            }
        }
        Err(e) => println!("  Error listing cameras: {}", e),
    }

    #[cfg(feature = "serial")]
    {
        println!();
        println!("Serial ports:");
        match media_relay::serial::list_ports() {
            Ok(ports) if ports.is_empty() => println!("  (none found)"),
            Ok(ports) => {
                for port in ports {
                    println!("  {} - {:?}", port.name, port.port_type);
                }
            }
            Err(e) => println!("  Error listing ports: {}", e),
        }
    }
}

/// Reject flags this build cannot honour before any device is opened.
fn check_build_features(args: &Args) -> Result<()> {
    if cfg!(not(feature = "serial")) && args.serial.is_some() {
        anyhow::bail!(
            "--serial needs a build with the `serial` feature (snapshot {}x{}, {} baud)",
            args.snapshot_width,
            args.snapshot_height,
            args.baudrate
        );
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
        print_devices();
        return Ok(());
    }

    check_build_features(&args)?;

    let path = device_path(&args.device);
    let camera = Camera::open_path(&path, args.width, args.height, args.fps)
        .map_err(|e| RelayError::DeviceOpen(format!("{}: {}", path, e)))?;

    tracing::info!("Camera: {}", path);
    tracing::info!(
        "Resolution: {}x{} @ {} fps ({})",
        camera.width(),
        camera.height(),
        args.fps,
        camera.format_name()
    );

    let (width, height) = (camera.width(), camera.height());
    let grabber = JpegCamera::new(camera, args.quality).mjpeg_passthrough(args.mjpeg_passthrough);
    let source = VideoSource::new(grabber, width, height);

    let shutdown = CancellationToken::new();

    #[cfg(feature = "serial")]
    let source = match args.serial.as_deref() {
        Some(port) => {
            use media_relay::serial::{open_control_port, SerialConfig};
            use media_relay::snapshot::{spawn_trigger_reader, DEFAULT_TRIGGER_BYTE};
            use media_relay::{SnapshotMode, SnapshotTrigger};

            let reader = open_control_port(&SerialConfig::new(port, args.baudrate))?;
            let trigger = SnapshotTrigger::new();
            spawn_trigger_reader(reader, trigger.clone(), DEFAULT_TRIGGER_BYTE, shutdown.clone())
                .context("Failed to start snapshot reader")?;
            tracing::info!(
                "Snapshot mode: {}x{} on '{}' from {}",
                args.snapshot_width,
                args.snapshot_height,
                DEFAULT_TRIGGER_BYTE as char,
                port
            );
            source.with_snapshot(SnapshotMode {
                trigger,
                width: args.snapshot_width,
                height: args.snapshot_height,
            })
        }
        None => source,
    };

    let server = RelayServerBuilder::new()
        .host(&args.host)
        .port(args.port)
        .backlog(args.backlog)
        .max_capture_failures(1)
        .build(source)
        .await
        .context("Failed to start video server")?;

    tracing::info!("Waiting for connections...");

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
    fn test_device_index_maps_to_path() {
        assert_eq!(device_path("3"), "/dev/video3");
        assert_eq!(device_path("/dev/video8"), "/dev/video8");
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["video-server"]);
        assert_eq!(args.device, "/dev/video8");
        assert_eq!((args.width, args.height, args.fps), (640, 480, 30));
        assert_eq!(args.port, 40917);
        assert_eq!(args.quality, 95);
        assert_eq!((args.snapshot_width, args.snapshot_height), (1920, 1080));
        assert_eq!(args.backlog, 1);
        assert!(args.serial.is_none());
    }

    #[test]
    fn test_height_flag_is_long_only() {
        let args = Args::parse_from(["video-server", "--height", "720", "--width", "1280"]);
        assert_eq!((args.width, args.height), (1280, 720));
    }

    #[test]
    fn test_serial_flag_checked_against_features() {
        let args = Args::parse_from(["video-server", "--serial", "/dev/ttyUSB0"]);
        let checked = check_build_features(&args);
        assert_eq!(checked.is_ok(), cfg!(feature = "serial"));

        let args = Args::parse_from(["video-server"]);
        assert!(check_build_features(&args).is_ok());
    }
}
