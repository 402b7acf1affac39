//! Error types for relay servers and capture sources.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors returned by a [`MediaSource`](crate::source::MediaSource) when
/// pulling the next unit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The device hiccuped (buffer overrun, short read). The session may retry.
    #[error("transient capture error: {0}")]
    Transient(String),

    /// The device can no longer deliver media for this session.
    #[error("capture failed: {0}")]
    Failed(String),
}

impl CaptureError {
    /// Whether the forwarding loop may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Transient(_))
    }
}

/// How an error affects the running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Startup cannot continue; the process should exit.
    FatalStartup,
    /// Ends the current session only; the server keeps listening.
    RecoverableSession,
    /// May be retried a bounded number of times within a session.
    TransientRetryable,
}

/// Errors produced by the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The capture device could not be opened or configured.
    #[error("failed to open capture device: {0}")]
    DeviceOpen(String),

    /// The listening socket could not be created, bound or put in listen mode.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The configured host is not an IP address.
    #[error("invalid host address: {0}")]
    InvalidHost(String),

    /// An unsupported configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Socket I/O on a client connection.
    #[error("client I/O error: {0}")]
    Io(#[from] io::Error),

    /// Capture error surfaced by a source.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// An encoded frame does not fit the 32-bit length prefix.
    #[error("frame too large for length prefix: {0} bytes")]
    FrameTooLarge(usize),
}

impl RelayError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::DeviceOpen(_)
            | RelayError::Listen { .. }
            | RelayError::InvalidHost(_)
            | RelayError::Config(_) => ErrorClass::FatalStartup,
            RelayError::Capture(CaptureError::Transient(_)) => ErrorClass::TransientRetryable,
            RelayError::Io(_) | RelayError::Capture(_) | RelayError::FrameTooLarge(_) => {
                ErrorClass::RecoverableSession
            }
        }
    }
}

/// Convenience alias for relay results.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;
