//! The seam between capture devices and the relay core.

use bytes::Bytes;

use crate::error::CaptureError;

/// A capture device yielding wire-ready media units.
///
/// `next_unit` blocks until the device produces the next frame or block and
/// returns it already framed for the wire. The relay calls it from a blocking
/// worker, one call at a time.
pub trait MediaSource: Send + 'static {
    /// Pull and frame the next unit.
    fn next_unit(&mut self) -> Result<Bytes, CaptureError>;

    /// Called before the first unit of every session.
    ///
    /// Sources that buffer between sessions drop stale data here so a new
    /// client starts with live media.
    fn begin_session(&mut self) {}

    /// Called after the unit returned by the last `next_unit` was fully
    /// written to the client. Units abandoned on supersession or shutdown
    /// never get this call.
    fn unit_delivered(&mut self) {}

    /// Short label used in logs.
    fn kind(&self) -> &'static str;
}

impl<S: MediaSource + ?Sized> MediaSource for Box<S> {
    fn next_unit(&mut self) -> Result<Bytes, CaptureError> {
        (**self).next_unit()
    }

    fn begin_session(&mut self) {
        (**self).begin_session()
    }

    fn unit_delivered(&mut self) {
        (**self).unit_delivered()
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}
