//! Single-client TCP relay for camera frames and microphone PCM.
//!
//! A relay server owns one capture source for its whole lifetime and
//! forwards it to the most recently connected TCP client. Accepting a new
//! client closes the previous one.
//!
//! Two wire formats are provided:
//!
//! - **video**: `[u32 big-endian length][JPEG bytes]`, repeated
//! - **audio**: raw little-endian i16 PCM in fixed-size blocks, no header
//!
//! The video source can also capture one frame at a higher resolution when a
//! trigger byte (`'S'`) arrives on a serial control port.
//!
//! # Example
//!
//! ```no_run
//! use media_relay::{RelayServerBuilder, VideoSource};
//! # use media_relay::{video::FrameGrabber, error::CaptureError};
//! # struct Grabber;
//! # impl FrameGrabber for Grabber {
//! #     fn grab_jpeg(&mut self) -> Result<Vec<u8>, CaptureError> { Ok(vec![0xFF, 0xD8]) }
//! #     fn set_resolution(&mut self, _: u32, _: u32) -> Result<(), CaptureError> { Ok(()) }
//! # }
//!
//! # async fn example() -> media_relay::Result<()> {
//! let source = VideoSource::new(Grabber, 640, 480);
//! let server = RelayServerBuilder::new()
//!     .port(40917)
//!     .build(source)
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `camera`: V4L2 capture and JPEG encoding (v4l + image)
//! - `audio`: microphone capture (cpal)
//! - `serial`: serial snapshot control port (serialport)
//!
//! The relay core, framing and the client build without any feature.

pub mod client;
pub mod error;
pub mod framing;
pub mod pcm;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod video;

#[cfg(feature = "audio")]
pub mod audio;
#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "serial")]
pub mod serial;

pub use client::{wav_header, AudioClient, VideoClient};
pub use error::{CaptureError, ErrorClass, RelayError, Result};
pub use pcm::{AudioSource, PcmCapture};
pub use server::{RelayServer, RelayServerBuilder, SessionOutcome};
pub use session::SessionManager;
pub use snapshot::{spawn_trigger_reader, SnapshotTrigger};
pub use source::MediaSource;
pub use video::{FrameGrabber, SnapshotMode, VideoSource};

#[cfg(feature = "audio")]
pub use audio::{AudioConfig, AudioInput};
#[cfg(feature = "camera")]
pub use camera::{list_cameras, Camera, JpegCamera};
#[cfg(feature = "serial")]
pub use serial::{list_ports, open_control_port, SerialConfig};
