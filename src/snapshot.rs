//! Externally triggered snapshot frames.
//!
//! A reader thread watches a byte stream (normally a serial port) for the
//! trigger byte and arms a shared flag. The video source consumes the flag
//! for exactly one frame captured at the snapshot resolution.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;

/// Byte that arms a snapshot.
pub const DEFAULT_TRIGGER_BYTE: u8 = b'S';

/// Shared one-shot snapshot flag.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTrigger {
    armed: Arc<AtomicBool>,
}

impl SnapshotTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request one high-resolution frame.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Whether a snapshot is pending.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Mark the pending snapshot as consumed.
    pub fn clear(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

/// Spawn a thread that arms `trigger` every time `trigger_byte` is read.
///
/// Read timeouts are ignored so a port opened with a short timeout lets the
/// thread notice `shutdown`. End of stream or a hard read error stops it.
pub fn spawn_trigger_reader<R>(
    mut reader: R,
    trigger: SnapshotTrigger,
    trigger_byte: u8,
    shutdown: CancellationToken,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("snapshot-trigger".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64];
            while !shutdown.is_cancelled() {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::info!("Snapshot control input closed");
                        break;
                    }
                    Ok(n) => {
                        if buf[..n].contains(&trigger_byte) {
                            tracing::info!("Snapshot requested");
                            trigger.arm();
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        tracing::error!("Snapshot control read error: {}", e);
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_trigger_arm_and_clear() {
        let trigger = SnapshotTrigger::new();
        assert!(!trigger.is_armed());

        let shared = trigger.clone();
        shared.arm();
        assert!(trigger.is_armed());

        trigger.clear();
        assert!(!shared.is_armed());
    }

    #[test]
    fn test_reader_arms_on_trigger_byte() {
        let trigger = SnapshotTrigger::new();
        let handle = spawn_trigger_reader(
            Cursor::new(b"xyzSabc".to_vec()),
            trigger.clone(),
            DEFAULT_TRIGGER_BYTE,
            CancellationToken::new(),
        )
        .unwrap();
        handle.join().unwrap();
        assert!(trigger.is_armed());
    }

    #[test]
    fn test_reader_ignores_other_bytes() {
        let trigger = SnapshotTrigger::new();
        let handle = spawn_trigger_reader(
            Cursor::new(b"hello s world".to_vec()),
            trigger.clone(),
            DEFAULT_TRIGGER_BYTE,
            CancellationToken::new(),
        )
        .unwrap();
        handle.join().unwrap();
        assert!(!trigger.is_armed());
    }

    struct TimeoutThenTrigger {
        calls: usize,
    }

    impl Read for TimeoutThenTrigger {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.calls += 1;
            match self.calls {
                1 | 2 => Err(ErrorKind::TimedOut.into()),
                3 => {
                    buf[0] = b'S';
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_reader_survives_timeouts() {
        let trigger = SnapshotTrigger::new();
        let handle = spawn_trigger_reader(
            TimeoutThenTrigger { calls: 0 },
            trigger.clone(),
            DEFAULT_TRIGGER_BYTE,
            CancellationToken::new(),
        )
        .unwrap();
        handle.join().unwrap();
        assert!(trigger.is_armed());
    }

    #[test]
    fn test_reader_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let trigger = SnapshotTrigger::new();
        let handle = spawn_trigger_reader(
            Cursor::new(b"S".to_vec()),
            trigger.clone(),
            DEFAULT_TRIGGER_BYTE,
            shutdown,
        )
        .unwrap();
        handle.join().unwrap();
        assert!(!trigger.is_armed());
    }
}
