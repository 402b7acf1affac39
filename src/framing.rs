//! Wire framing for the relay streams.
//!
//! Video frames are sent as a 4-byte big-endian length followed by the JPEG
//! payload. Audio is sent as fixed-size blocks of little-endian i16 samples
//! with no header; the receiver knows the block size out of band.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};

/// Size of the video frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Bytes per PCM sample (i16).
pub const SAMPLE_BYTES: usize = 2;

/// Largest frame a reader will accept before treating the stream as corrupt.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Prefix `payload` with its big-endian length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(payload.len()).map_err(|_| RelayError::FrameTooLarge(payload.len()))?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit {}", len, MAX_FRAME_LEN),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Read one fixed-size audio block.
///
/// Returns `Ok(None)` on a clean end of stream at a block boundary.
pub async fn read_block<R: AsyncRead + Unpin>(
    reader: &mut R,
    block_bytes: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut block = vec![0u8; block_bytes];
    let mut filled = 0;
    while filled < block_bytes {
        let n = reader.read(&mut block[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }
    Ok(Some(block))
}

/// Regroups arbitrarily sized sample chunks into fixed-size blocks.
///
/// Capture backends deliver whatever the driver hands them per callback;
/// clients expect exact blocks.
#[derive(Debug)]
pub struct PcmBlocker {
    block_bytes: usize,
    pending: BytesMut,
}

impl PcmBlocker {
    /// Create a blocker emitting `samples_per_block` i16 samples per block.
    pub fn new(samples_per_block: usize) -> Self {
        let block_bytes = samples_per_block.max(1) * SAMPLE_BYTES;
        Self {
            block_bytes,
            pending: BytesMut::with_capacity(block_bytes * 2),
        }
    }

    /// Block size in bytes.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Append samples, encoded little-endian.
    pub fn push_samples(&mut self, samples: &[i16]) {
        self.pending.reserve(samples.len() * SAMPLE_BYTES);
        for s in samples {
            self.pending.put_i16_le(*s);
        }
    }

    /// Take the next complete block, if one is buffered.
    pub fn next_block(&mut self) -> Option<Bytes> {
        if self.pending.len() >= self.block_bytes {
            Some(self.pending.split_to(self.block_bytes).freeze())
        } else {
            None
        }
    }

    /// Number of bytes waiting for a complete block.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial block.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_prefix_matches_payload() {
        let payload = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + payload.len());
        assert_eq!(&frame[..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&frame[4..], &payload[..]);
    }

    #[test]
    fn test_encode_empty_frame() {
        let frame = encode_frame(&[]).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_frame_sequence_then_eof() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(b"first").unwrap());
        wire.extend_from_slice(&encode_frame(b"second frame").unwrap());
        let mut reader = &wire[..];

        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"first");
        assert_eq!(
            read_frame(&mut reader).await.unwrap().unwrap(),
            b"second frame"
        );
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload_is_error() {
        let mut wire = encode_frame(b"abcdef").unwrap().to_vec();
        wire.truncate(7);
        let mut reader = &wire[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let wire = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut reader = &wire[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_read_block_partial_tail_is_error() {
        let wire = vec![1u8; 6];
        let mut reader = &wire[..];
        assert_eq!(read_block(&mut reader, 4).await.unwrap().unwrap(), vec![1; 4]);
        assert!(read_block(&mut reader, 4).await.is_err());
    }

    #[test]
    fn test_blocker_regroups_uneven_chunks() {
        let mut blocker = PcmBlocker::new(4);
        assert_eq!(blocker.block_bytes(), 8);

        blocker.push_samples(&[1, 2, 3]);
        assert!(blocker.next_block().is_none());

        blocker.push_samples(&[4, 5, 6, 7, 8, 9]);
        let first = blocker.next_block().unwrap();
        assert_eq!(&first[..], &[1, 0, 2, 0, 3, 0, 4, 0]);
        let second = blocker.next_block().unwrap();
        assert_eq!(&second[..], &[5, 0, 6, 0, 7, 0, 8, 0]);
        assert!(blocker.next_block().is_none());
        assert_eq!(blocker.buffered(), 2);

        blocker.reset();
        assert_eq!(blocker.buffered(), 0);
    }

    #[test]
    fn test_blocker_encodes_little_endian() {
        let mut blocker = PcmBlocker::new(2);
        blocker.push_samples(&[-2, 0x1234]);
        let block = blocker.next_block().unwrap();
        assert_eq!(&block[..], &[0xFE, 0xFF, 0x34, 0x12]);
    }
}
