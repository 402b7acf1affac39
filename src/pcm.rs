//! Audio source: fixed-size blocks of little-endian i16 PCM, no header.

use bytes::Bytes;

use crate::error::CaptureError;
use crate::framing::PcmBlocker;
use crate::source::MediaSource;

/// Default samples per block (per channel).
pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

/// A microphone delivering interleaved i16 samples in driver-sized chunks.
pub trait PcmCapture: Send + 'static {
    /// Block until the next chunk of samples is available.
    fn read_chunk(&mut self) -> Result<Vec<i16>, CaptureError>;

    /// Drop anything captured while no client was listening.
    fn discard_pending(&mut self) {}
}

/// Wraps a [`PcmCapture`] into a relay source emitting exact blocks.
pub struct AudioSource<C: PcmCapture> {
    capture: C,
    blocker: PcmBlocker,
}

impl<C: PcmCapture> AudioSource<C> {
    /// `frames_per_block * channels` samples go into every block.
    pub fn new(capture: C, frames_per_block: usize, channels: u16) -> Self {
        let samples = frames_per_block.max(1) * usize::from(channels.max(1));
        Self {
            capture,
            blocker: PcmBlocker::new(samples),
        }
    }

    /// Block size on the wire, in bytes.
    pub fn block_bytes(&self) -> usize {
        self.blocker.block_bytes()
    }
}

impl<C: PcmCapture> MediaSource for AudioSource<C> {
    fn next_unit(&mut self) -> Result<Bytes, CaptureError> {
        loop {
            if let Some(block) = self.blocker.next_block() {
                return Ok(block);
            }
            match self.capture.read_chunk() {
                Ok(samples) => self.blocker.push_samples(&samples),
                Err(e) => {
                    // A gap in the capture makes the partial block meaningless.
                    self.blocker.reset();
                    return Err(e);
                }
            }
        }
    }

    fn begin_session(&mut self) {
        self.capture.discard_pending();
        self.blocker.reset();
    }

    fn kind(&self) -> &'static str {
        "audio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedCapture {
        chunks: VecDeque<Result<Vec<i16>, CaptureError>>,
        discarded: bool,
    }

    impl PcmCapture for ScriptedCapture {
        fn read_chunk(&mut self) -> Result<Vec<i16>, CaptureError> {
            self.chunks
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Failed("script exhausted".into())))
        }

        fn discard_pending(&mut self) {
            self.discarded = true;
        }
    }

    fn scripted(chunks: Vec<Result<Vec<i16>, CaptureError>>) -> ScriptedCapture {
        ScriptedCapture {
            chunks: chunks.into(),
            discarded: false,
        }
    }

    #[test]
    fn test_blocks_are_exact_size() {
        let capture = scripted(vec![
            Ok((0..3).collect()),
            Ok((3..10).collect()),
            Ok((10..12).collect()),
        ]);
        let mut source = AudioSource::new(capture, 4, 1);
        assert_eq!(source.block_bytes(), 8);

        let blocks: Vec<_> = (0..3).map(|_| source.next_unit().unwrap()).collect();
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.len(), 8);
            let first = i16::from_le_bytes([block[0], block[1]]);
            assert_eq!(first, (i * 4) as i16);
        }
        assert!(source.next_unit().is_err());
    }

    #[test]
    fn test_stereo_block_size() {
        let source = AudioSource::new(scripted(vec![]), 1024, 2);
        assert_eq!(source.block_bytes(), 4096);
    }

    #[test]
    fn test_error_drops_partial_block() {
        let capture = scripted(vec![
            Ok(vec![1, 2, 3]),
            Err(CaptureError::Transient("overrun".into())),
            Ok(vec![7, 8, 9, 10]),
        ]);
        let mut source = AudioSource::new(capture, 4, 1);

        assert_eq!(
            source.next_unit().unwrap_err(),
            CaptureError::Transient("overrun".into())
        );
        let block = source.next_unit().unwrap();
        assert_eq!(&block[..], &[7, 0, 8, 0, 9, 0, 10, 0]);
    }

    #[test]
    fn test_begin_session_discards_stale_audio() {
        let capture = scripted(vec![Ok(vec![1, 2]), Ok(vec![5, 6, 7, 8])]);
        let mut source = AudioSource::new(capture, 4, 1);

        // Leave a partial block buffered, then start a new session.
        source.blocker.push_samples(&[42, 43]);
        source.begin_session();
        assert!(source.capture.discarded);
        assert_eq!(source.blocker.buffered(), 0);

        let block = source.next_unit().unwrap();
        assert_eq!(&block[..], &[1, 0, 2, 0, 5, 0, 6, 0]);
    }
}
