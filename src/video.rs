//! Video source: JPEG frames with a 4-byte length prefix, plus snapshot mode.

use bytes::Bytes;

use crate::error::CaptureError;
use crate::framing::encode_frame;
use crate::snapshot::SnapshotTrigger;
use crate::source::MediaSource;

/// A camera that produces JPEG-encoded frames and can change resolution.
pub trait FrameGrabber: Send + 'static {
    /// Capture and encode one frame.
    fn grab_jpeg(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// Reconfigure the capture resolution.
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError>;
}

/// Snapshot settings for a [`VideoSource`].
#[derive(Debug, Clone)]
pub struct SnapshotMode {
    pub trigger: SnapshotTrigger,
    pub width: u32,
    pub height: u32,
}

/// Wraps a [`FrameGrabber`] into a relay source.
pub struct VideoSource<G: FrameGrabber> {
    grabber: G,
    width: u32,
    height: u32,
    snapshot: Option<SnapshotMode>,
    // Last unit was a snapshot the client has not received yet.
    snapshot_pending: bool,
}

impl<G: FrameGrabber> VideoSource<G> {
    /// `width`/`height` is the normal streaming resolution the grabber is
    /// already configured for.
    pub fn new(grabber: G, width: u32, height: u32) -> Self {
        Self {
            grabber,
            width,
            height,
            snapshot: None,
            snapshot_pending: false,
        }
    }

    /// Enable snapshot mode.
    pub fn with_snapshot(mut self, snapshot: SnapshotMode) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Normal streaming resolution.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn grabber(&self) -> &G {
        &self.grabber
    }

    fn capture_snapshot(&mut self, mode: &SnapshotMode) -> Result<Vec<u8>, CaptureError> {
        tracing::info!("Capturing snapshot at {}x{}", mode.width, mode.height);

        let grabbed = self
            .grabber
            .set_resolution(mode.width, mode.height)
            .and_then(|_| self.grabber.grab_jpeg());
        // A successful snapshot stays armed until it reaches a client.
        match &grabbed {
            Ok(_) => self.snapshot_pending = true,
            Err(_) => mode.trigger.clear(),
        }

        self.grabber
            .set_resolution(self.width, self.height)
            .map_err(|e| CaptureError::Failed(format!("failed to restore resolution: {}", e)))?;

        grabbed
    }
}

impl<G: FrameGrabber> MediaSource for VideoSource<G> {
    fn next_unit(&mut self) -> Result<Bytes, CaptureError> {
        self.snapshot_pending = false;
        let armed = self
            .snapshot
            .as_ref()
            .filter(|mode| mode.trigger.is_armed())
            .cloned();

        let jpeg = match armed {
            Some(mode) => self.capture_snapshot(&mode)?,
            None => self.grabber.grab_jpeg()?,
        };

        encode_frame(&jpeg).map_err(|e| CaptureError::Failed(e.to_string()))
    }

    fn unit_delivered(&mut self) {
        if !self.snapshot_pending {
            return;
        }
        self.snapshot_pending = false;
        if let Some(mode) = &self.snapshot {
            mode.trigger.clear();
            tracing::info!("Snapshot delivered");
        }
    }

    fn kind(&self) -> &'static str {
        "video"
    }
}
