//! Camera capture using V4L2.
//!
//! This module provides camera access using the v4l crate (Video4Linux2).
//! The device stays open for the lifetime of the server; changing resolution
//! for a snapshot stops the stream, renegotiates the format and restarts it.
//!
//! # Example
//!
//! ```rust,no_run
//! use media_relay::camera::{Camera, list_cameras};
//!
//! for cam in list_cameras().unwrap() {
//!     println!("Camera: {} ({})", cam.name, cam.path.display());
//! }
//!
//! let mut camera = Camera::open_path("/dev/video0", 640, 480, 30).unwrap();
//! let frame = camera.capture().unwrap();
//! let jpeg = frame.to_jpeg(95).unwrap();
//! println!("{}x{}, {} JPEG bytes", frame.width, frame.height, jpeg.len());
//! ```

use anyhow::Result;
use std::path::PathBuf;
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::error::CaptureError;
use crate::video::FrameGrabber;

const STREAM_BUFFERS: u32 = 4;

/// Ask V4L2 whether `fourcc` at `width`×`height` is an advertised frame size.
/// Returns `true` if the driver can't enumerate (fall through to set_format).
fn device_supports_resolution(device: &Device, fourcc: FourCC, width: u32, height: u32) -> bool {
    let framesizes = match device.enum_framesizes(fourcc) {
        Ok(sizes) if !sizes.is_empty() => sizes,
        _ => return true,
    };
    framesizes.into_iter().any(|fs| match fs.size {
        FrameSizeEnum::Discrete(d) => d.width == width && d.height == height,
        FrameSizeEnum::Stepwise(s) => {
            let w_ok = width >= s.min_width
                && width <= s.max_width
                && (s.step_width == 0 || (width - s.min_width) % s.step_width == 0);
            let h_ok = height >= s.min_height
                && height <= s.max_height
                && (s.step_height == 0 || (height - s.min_height) % s.step_height == 0);
            w_ok && h_ok
        }
    })
}

/// Information about an available camera.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Camera index (the N in /dev/videoN).
    pub index: u32,
    /// Human-readable camera name.
    pub name: String,
    /// Device path (e.g., /dev/video0).
    pub path: PathBuf,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Raw RGB data (3 bytes per pixel, row-major).
    pub data: Vec<u8>,
}

impl Frame {
    /// Convert frame to JPEG bytes.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        use image::codecs::jpeg::JpegEncoder;
        use image::ExtendedColorType;

        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() < expected {
            anyhow::bail!(
                "frame buffer too short: {} bytes for {}x{}",
                self.data.len(),
                self.width,
                self.height
            );
        }

        let mut jpeg_data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, quality.clamp(1, 100));
        encoder.encode(
            &self.data[..expected],
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;

        Ok(jpeg_data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CaptureFormat {
    Mjpeg,
    Yuyv,
    Grey,
}

/// Options for opening a camera.
#[derive(Debug, Clone, Default)]
pub struct CameraOptions {
    /// Prefer YUYV over MJPEG.
    /// Default: false (prefer MJPEG for CPU efficiency)
    pub prefer_yuyv: bool,
}

/// A camera capture device using V4L2.
pub struct Camera {
    device: &'static Device,
    stream: Option<Stream<'static>>,
    width: u32,
    height: u32,
    fps: u32,
    format: CaptureFormat,
    options: CameraOptions,
}

// Camera is Send because v4l types are Send
unsafe impl Send for Camera {}

impl Camera {
    /// Open a camera by index (`/dev/video{index}`).
    pub fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        Self::open_path(&format!("/dev/video{}", index), width, height, fps)
    }

    /// Open a camera by device path.
    pub fn open_path(path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        Self::open_path_with_options(path, width, height, fps, CameraOptions::default())
    }

    /// Open a camera by device path with options.
    pub fn open_path_with_options(
        path: &str,
        width: u32,
        height: u32,
        fps: u32,
        options: CameraOptions,
    ) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|e| anyhow::anyhow!("Could not open video device {}: {}", path, e))?;

        // The mmap stream needs a 'static device; the camera lives as long as
        // the process anyway.
        let device: &'static Device = Box::leak(Box::new(device));

        let mut camera = Camera {
            device,
            stream: None,
            width,
            height,
            fps,
            format: CaptureFormat::Mjpeg,
            options,
        };
        camera.start(width, height)?;
        Ok(camera)
    }

    /// Negotiate format and frame rate, then start streaming.
    fn start(&mut self, width: u32, height: u32) -> Result<()> {
        let (format, capture_format) =
            Self::try_set_format(self.device, width, height, self.options.prefer_yuyv)?;

        if format.width != width || format.height != height {
            tracing::warn!(
                "Requested {}x{}, camera gave {}x{}",
                width,
                height,
                format.width,
                format.height
            );
        }

        if self.fps > 0 {
            if let Err(e) = self.device.set_params(&Parameters::with_fps(self.fps)) {
                tracing::warn!("Failed to set frame rate {}: {}", self.fps, e);
            }
        }

        self.width = format.width;
        self.height = format.height;
        self.format = capture_format;
        self.stream = Some(Stream::with_buffers(
            self.device,
            Type::VideoCapture,
            STREAM_BUFFERS,
        )?);

        tracing::debug!(
            "Camera streaming {}x{} {}",
            self.width,
            self.height,
            self.format_name()
        );
        Ok(())
    }

    fn try_set_format(
        device: &Device,
        width: u32,
        height: u32,
        prefer_yuyv: bool,
    ) -> Result<(v4l::Format, CaptureFormat)> {
        let mut format = device.format()?;
        format.width = width;
        format.height = height;

        let yuyv = FourCC::new(b"YUYV");
        let mjpg = FourCC::new(b"MJPG");

        // Only gate YUYV on ENUM_FRAMESIZES; many cameras scale MJPEG to
        // sizes they never advertise.
        let yuyv_ok = device_supports_resolution(device, yuyv, width, height);

        if prefer_yuyv && yuyv_ok {
            format.fourcc = yuyv;
            if let Ok(f) = device.set_format(&format) {
                if f.fourcc == yuyv {
                    return Ok((f, CaptureFormat::Yuyv));
                }
            }
        }

        format.fourcc = mjpg;
        if let Ok(f) = device.set_format(&format) {
            if f.fourcc == mjpg {
                return Ok((f, CaptureFormat::Mjpeg));
            }
        }

        if !prefer_yuyv && yuyv_ok {
            format.fourcc = yuyv;
            if let Ok(f) = device.set_format(&format) {
                if f.fourcc == yuyv {
                    return Ok((f, CaptureFormat::Yuyv));
                }
            }
        }

        // Accept whatever the camera gives us
        let f = device.format()?;
        let grey = [
            FourCC::new(b"GREY"),
            FourCC::new(b"Y8  "),
            FourCC::new(b"Y800"),
        ];
        if f.fourcc == yuyv {
            Ok((f, CaptureFormat::Yuyv))
        } else if grey.contains(&f.fourcc) {
            Ok((f, CaptureFormat::Grey))
        } else if f.fourcc == mjpg {
            Ok((f, CaptureFormat::Mjpeg))
        } else {
            anyhow::bail!("Unsupported capture format {}", f.fourcc)
        }
    }

    /// Get the actual frame width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the actual frame height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get the capture format.
    pub fn format_name(&self) -> &'static str {
        match self.format {
            CaptureFormat::Mjpeg => "MJPEG",
            CaptureFormat::Yuyv => "YUYV",
            CaptureFormat::Grey => "GREY",
        }
    }

    /// Whether frames arrive as JPEG already.
    pub fn is_mjpeg(&self) -> bool {
        self.format == CaptureFormat::Mjpeg
    }

    /// Stop streaming, renegotiate the resolution and restart.
    pub fn set_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        if self.stream.is_some() && width == self.width && height == self.height {
            return Ok(());
        }
        // Drivers refuse S_FMT while buffers are mapped.
        self.stream = None;
        self.start(width, height)
    }

    /// Dequeue the next buffer as it came from the driver.
    pub fn capture_raw(&mut self) -> Result<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Camera stream is not running"))?;
        let (data, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(data.len());
        let used = if used == 0 { data.len() } else { used };
        Ok(data[..used].to_vec())
    }

    /// Capture a single frame (converted to RGB).
    pub fn capture(&mut self) -> Result<Frame> {
        let data = self.capture_raw()?;
        let expected_yuyv = (self.width as usize) * (self.height as usize) * 2;

        let rgb_data = match self.format {
            CaptureFormat::Yuyv if data.len() >= expected_yuyv => {
                yuyv_to_rgb(&data, self.width, self.height)
            }
            CaptureFormat::Yuyv => {
                // Some drivers report YUYV but deliver MJPEG.
                self.format = CaptureFormat::Mjpeg;
                mjpeg_to_rgb(&data)?
            }
            CaptureFormat::Grey => grey_to_rgb(&data, self.width, self.height),
            CaptureFormat::Mjpeg => mjpeg_to_rgb(&data)?,
        };

        Ok(Frame {
            width: self.width,
            height: self.height,
            data: rgb_data,
        })
    }
}

fn mjpeg_to_rgb(data: &[u8]) -> Result<Vec<u8>> {
    use image::ImageReader;
    use std::io::Cursor;

    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?
        .to_rgb8();

    Ok(img.into_raw())
}

fn grey_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    data.iter()
        .take(pixels)
        .flat_map(|&y| [y, y, y])
        .collect()
}

fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let mut rgb = vec![0u8; width * height * 3];

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let idx = (y * width + x) * 2;
            let y0 = yuyv.get(idx).copied().unwrap_or(0) as f32;
            let u = yuyv.get(idx + 1).copied().unwrap_or(128) as f32;
            let y1 = yuyv.get(idx + 2).copied().unwrap_or(0) as f32;
            let v = yuyv.get(idx + 3).copied().unwrap_or(128) as f32;

            // BT.601
            let d = u - 128.0;
            let e = v - 128.0;
            for (offset, luma) in [(0usize, y0), (1, y1)] {
                let c = luma - 16.0;
                let out = (y * width + x + offset) * 3;
                if out + 2 < rgb.len() {
                    rgb[out] = (1.164 * c + 1.596 * e).clamp(0.0, 255.0) as u8;
                    rgb[out + 1] = (1.164 * c - 0.392 * d - 0.813 * e).clamp(0.0, 255.0) as u8;
                    rgb[out + 2] = (1.164 * c + 2.017 * d).clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    rgb
}

/// A [`Camera`] producing JPEG frames for the relay.
pub struct JpegCamera {
    camera: Camera,
    quality: u8,
    mjpeg_passthrough: bool,
}

impl JpegCamera {
    /// Re-encode every frame at `quality` (1-100).
    pub fn new(camera: Camera, quality: u8) -> Self {
        Self {
            camera,
            quality: quality.clamp(1, 100),
            mjpeg_passthrough: false,
        }
    }

    /// Forward MJPEG buffers untouched instead of decoding and re-encoding.
    pub fn mjpeg_passthrough(mut self, enable: bool) -> Self {
        self.mjpeg_passthrough = enable;
        self
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }
}

impl FrameGrabber for JpegCamera {
    fn grab_jpeg(&mut self) -> Result<Vec<u8>, CaptureError> {
        let failed =
            |e: anyhow::Error| CaptureError::Failed(format!("Failed to capture frame: {}", e));

        if self.mjpeg_passthrough && self.camera.is_mjpeg() {
            return self.camera.capture_raw().map_err(failed);
        }

        let frame = self.camera.capture().map_err(failed)?;
        frame.to_jpeg(self.quality).map_err(failed)
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        self.camera
            .set_resolution(width, height)
            .map_err(|e| CaptureError::Failed(format!("Failed to set resolution: {}", e)))
    }
}

/// List all available cameras.
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    let mut cameras = Vec::new();

    for entry in std::fs::read_dir("/dev")? {
        let path = entry?.path();

        let Some(index) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let name = Device::with_path(&path)
            .and_then(|d| d.query_caps())
            .map(|c| c.card)
            .unwrap_or_else(|_| format!("Camera {}", index));

        cameras.push(CameraInfo { index, name, path });
    }

    cameras.sort_by_key(|c| c.index);
    Ok(cameras)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[0, 128, 255, 7], 2, 2);
        assert_eq!(rgb, vec![0, 0, 0, 128, 128, 128, 255, 255, 255, 7, 7, 7]);
    }

    #[test]
    fn test_yuyv_black_and_white() {
        // Two pixels: Y=16 (black) and Y=235 (white), neutral chroma.
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1);
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert!(rgb[3..].iter().all(|&c| c >= 254));
    }

    #[test]
    fn test_frame_to_jpeg_has_soi_marker() {
        let frame = Frame {
            width: 8,
            height: 8,
            data: vec![200; 8 * 8 * 3],
        };
        let jpeg = frame.to_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_frame_to_jpeg_rejects_short_buffer() {
        let frame = Frame {
            width: 8,
            height: 8,
            data: vec![0; 10],
        };
        assert!(frame.to_jpeg(90).is_err());
    }
}
