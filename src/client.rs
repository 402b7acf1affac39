//! Receiving side of the relay streams.

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::framing::{read_block, read_frame, SAMPLE_BYTES};

/// Size of the canonical RIFF/WAVE header written by [`wav_header`].
pub const WAV_HEADER_SIZE: usize = 44;

/// Offset of the RIFF chunk size field.
pub const WAV_RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the `data` chunk size field.
pub const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Header for 16-bit PCM WAV data of `data_len` bytes.
///
/// The relay stream carries no format information, so `sample_rate` and
/// `channels` must match what the audio server was started with.
pub fn wav_header(sample_rate: u32, channels: u16, data_len: u32) -> Bytes {
    let block_align = channels * SAMPLE_BYTES as u16;
    let mut buf = BytesMut::with_capacity(WAV_HEADER_SIZE);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(data_len.saturating_add(WAV_HEADER_SIZE as u32 - 8));
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1); // integer PCM
    buf.put_u16_le(channels);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(sample_rate * u32::from(block_align));
    buf.put_u16_le(block_align);
    buf.put_u16_le(16);

    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    buf.freeze()
}

/// Reads length-prefixed JPEG frames from a video server.
pub struct VideoClient {
    stream: TcpStream,
}

impl VideoClient {
    /// Connect to a video server.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to video server")?;
        Ok(Self { stream })
    }

    /// Read the next JPEG frame. `None` means the server closed the stream.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(read_frame(&mut self.stream).await?)
    }
}

/// Reads fixed-size PCM blocks from an audio server.
pub struct AudioClient {
    stream: TcpStream,
    block_bytes: usize,
}

impl AudioClient {
    /// Connect to an audio server sending `frames_per_block * channels`
    /// samples per block.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        frames_per_block: usize,
        channels: u16,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to audio server")?;
        Ok(Self {
            stream,
            block_bytes: frames_per_block.max(1) * usize::from(channels.max(1)) * SAMPLE_BYTES,
        })
    }

    /// Bytes per block.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Read the next raw block. `None` means the server closed the stream.
    pub async fn read_block(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(read_block(&mut self.stream, self.block_bytes).await?)
    }

    /// Read the next block decoded into samples.
    pub async fn read_samples(&mut self) -> Result<Option<Vec<i16>>> {
        Ok(self.read_block().await?.map(|block| {
            block
                .chunks_exact(SAMPLE_BYTES)
                .map(|s| i16::from_le_bytes([s[0], s[1]]))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn test_wav_header_stereo_48k() {
        let header = wav_header(48000, 2, 19200);
        assert_eq!(header.len(), WAV_HEADER_SIZE);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32_at(&header, WAV_RIFF_SIZE_OFFSET as usize), 36 + 19200);
        assert_eq!(&header[8..16], b"WAVEfmt ");
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 48000);
        assert_eq!(u32_at(&header, 28), 192_000);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32_at(&header, WAV_DATA_SIZE_OFFSET as usize), 19200);
    }

    #[test]
    fn test_wav_header_empty_mono() {
        let header = wav_header(44100, 1, 0);
        assert_eq!(u32_at(&header, 4), 36);
        assert_eq!(u32_at(&header, 28), 88_200);
        assert_eq!(u16_at(&header, 32), 2);
        assert_eq!(u32_at(&header, 40), 0);
    }
}
