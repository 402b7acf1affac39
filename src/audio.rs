//! Microphone capture using cpal.
//!
//! Provides cross-platform audio input (ALSA, CoreAudio, WASAPI). Samples
//! always leave this module as interleaved i16, whatever the device's native
//! sample format is.

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::CaptureError;
use crate::pcm::PcmCapture;

/// Callback chunks buffered between the device and the relay.
const CHANNEL_DEPTH: usize = 32;

/// How long `read_chunk` waits before reporting a stalled device.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio capture configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}

/// Which input device to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSelector {
    Default,
    Index(usize),
    Name(String),
}

impl InputSelector {
    /// `"default"`, a device index, or a name substring.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            InputSelector::Default
        } else if let Ok(index) = s.parse() {
            InputSelector::Index(index)
        } else {
            InputSelector::Name(s.to_string())
        }
    }

    fn find(&self, host: &cpal::Host) -> Result<cpal::Device> {
        match self {
            InputSelector::Default => host
                .default_input_device()
                .ok_or_else(|| anyhow::anyhow!("No default input device")),
            InputSelector::Index(index) => host
                .input_devices()
                .map_err(|e| anyhow::anyhow!("Failed to enumerate input devices: {}", e))?
                .nth(*index)
                .ok_or_else(|| anyhow::anyhow!("Input device {} not found", index)),
            InputSelector::Name(name) => host
                .input_devices()
                .map_err(|e| anyhow::anyhow!("Failed to enumerate input devices: {}", e))?
                .find(|d| d.name().map(|n| n.contains(name.as_str())).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("No input device matching '{}'", name)),
        }
    }
}

/// A supported capture configuration range.
#[derive(Debug, Clone)]
pub struct InputRange {
    pub channels: u16,
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub sample_format: String,
}

/// Information about an audio input device.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub ranges: Vec<InputRange>,
}

/// List available input (microphone) devices.
pub fn list_inputs() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| anyhow::anyhow!("Failed to enumerate input devices: {}", e))?
        .enumerate()
        .map(|(i, d)| {
            let name = d.name().unwrap_or_else(|_| format!("Input {}", i));
            let ranges = d
                .supported_input_configs()
                .map(|configs| {
                    configs
                        .map(|c| InputRange {
                            channels: c.channels(),
                            min_sample_rate: c.min_sample_rate().0,
                            max_sample_rate: c.max_sample_rate().0,
                            sample_format: c.sample_format().to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            AudioDeviceInfo {
                index: i,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                ranges,
            }
        })
        .collect();
    Ok(devices)
}

type Chunk = Result<Vec<i16>, CaptureError>;

/// Captures audio from a microphone.
///
/// The cpal stream is not `Send`, so it is built and kept alive on a
/// dedicated thread. Its callback pushes sample chunks into a bounded
/// channel; when the relay falls behind, chunks are dropped and the next
/// read reports the overflow.
pub struct AudioInput {
    rx: mpsc::Receiver<Chunk>,
    dropped: Arc<AtomicU64>,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    name: String,
    config: AudioConfig,
}

impl AudioInput {
    /// Open the default input device with the given config.
    pub fn open(config: AudioConfig) -> Result<Self> {
        Self::open_with(InputSelector::Default, config)
    }

    /// Open the device picked by `selector`.
    pub fn open_with(selector: InputSelector, config: AudioConfig) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Chunk>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let dropped = Arc::new(AtomicU64::new(0));

        let cfg = config.clone();
        let counter = dropped.clone();
        let thread = std::thread::Builder::new()
            .name("audio-input".to_string())
            .spawn(move || {
                let stream = match build_stream(&selector, &cfg, tx, counter) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Keep the stream alive until the input is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        let name = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("Audio input thread exited"))??;
        tracing::info!(
            "Opened input device: {} ({} Hz, {} ch)",
            name,
            config.sample_rate,
            config.channels
        );

        Ok(AudioInput {
            rx,
            dropped,
            stop: Some(stop_tx),
            thread: Some(thread),
            name,
            config,
        })
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the audio config.
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl PcmCapture for AudioInput {
    fn read_chunk(&mut self) -> Result<Vec<i16>, CaptureError> {
        let dropped = self.dropped.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            return Err(CaptureError::Transient(format!(
                "input overflow, {} chunks dropped",
                dropped
            )));
        }

        match self.rx.recv_timeout(READ_TIMEOUT) {
            Ok(chunk) => chunk,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(CaptureError::Transient("no audio data from device".into()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(CaptureError::Failed("audio input stream closed".into()))
            }
        }
    }

    fn discard_pending(&mut self) {
        let mut stale = 0usize;
        while self.rx.try_recv().is_ok() {
            stale += 1;
        }
        self.dropped.store(0, Ordering::Release);
        if stale > 0 {
            tracing::debug!("Discarded {} stale audio chunks", stale);
        }
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_stream(
    selector: &InputSelector,
    config: &AudioConfig,
    tx: mpsc::SyncSender<Chunk>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = selector.find(&host)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let native = device
        .default_input_config()
        .map_err(|e| anyhow::anyhow!("No input config for {}: {}", name, e))?
        .sample_format();

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_tx = tx.clone();
    let on_error = move |err: cpal::StreamError| {
        tracing::error!("Audio input error: {}", err);
        let _ = err_tx.try_send(Err(classify_stream_error(&err)));
    };

    let stream = match native {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push(&tx, &dropped, data.to_vec());
            },
            on_error,
            None,
        )?,
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                push(&tx, &dropped, data.iter().map(|&s| u16_to_i16(s)).collect());
            },
            on_error,
            None,
        )?,
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push(&tx, &dropped, data.iter().map(|&s| f32_to_i16(s)).collect());
            },
            on_error,
            None,
        )?,
        other => anyhow::bail!("Unsupported input sample format {}", other),
    };

    stream.play()?;
    Ok((stream, name))
}

fn push(tx: &mpsc::SyncSender<Chunk>, dropped: &AtomicU64, samples: Vec<i16>) {
    if let Err(mpsc::TrySendError::Full(_)) = tx.try_send(Ok(samples)) {
        dropped.fetch_add(1, Ordering::AcqRel);
    }
}

fn classify_stream_error(err: &cpal::StreamError) -> CaptureError {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            CaptureError::Failed("audio device no longer available".into())
        }
        cpal::StreamError::BackendSpecific { err } => CaptureError::Transient(err.to_string()),
    }
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn u16_to_i16(s: u16) -> i16 {
    (i32::from(s) - 32768) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(InputSelector::parse("default"), InputSelector::Default);
        assert_eq!(InputSelector::parse(""), InputSelector::Default);
        assert_eq!(InputSelector::parse("2"), InputSelector::Index(2));
        assert_eq!(
            InputSelector::parse("USB Audio"),
            InputSelector::Name("USB Audio".to_string())
        );
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);
        assert_eq!(u16_to_i16(32768), 0);
        assert_eq!(u16_to_i16(0), i16::MIN);
        assert_eq!(u16_to_i16(u16::MAX), i16::MAX);
    }

    #[test]
    fn test_push_counts_overflow() {
        let (tx, rx) = mpsc::sync_channel::<Chunk>(1);
        let dropped = AtomicU64::new(0);
        push(&tx, &dropped, vec![1]);
        push(&tx, &dropped, vec![2]);
        push(&tx, &dropped, vec![3]);
        assert_eq!(dropped.load(Ordering::Acquire), 2);
        assert_eq!(rx.try_recv().unwrap().unwrap(), vec![1]);
    }

    #[test]
    fn test_stream_error_classes() {
        assert!(!classify_stream_error(&cpal::StreamError::DeviceNotAvailable).is_transient());
        let backend = cpal::StreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "xrun".into(),
            },
        };
        assert!(classify_stream_error(&backend).is_transient());
    }
}
