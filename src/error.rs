//! Error taxonomy for the capture engine.
//!
//! Non-fatal conditions are deliberately not here: "no frame ready yet" is
//! `Ok(None)` from the acquire path, an unsupported crop is `Ok(false)`, and
//! a poll timeout is `Ok(false)` — callers retry or degrade, they do not
//! handle an error.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::pool::BufferState;

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device path does not resolve to a character special file.
    #[error("{} is not a character device", .0.display())]
    PathInvalid(PathBuf),

    /// Opening the device node failed.
    #[error("cannot open {}: {source}", .path.display())]
    OpenFailed {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying open error.
        #[source]
        source: io::Error,
    },

    /// A device control request failed with an errno the control channel
    /// does not classify as transient.
    #[error("{operation} failed: {errno}")]
    Device {
        /// The control request that failed (e.g. `VIDIOC_QBUF`).
        operation: &'static str,
        /// The errno the device reported.
        errno: Errno,
    },

    /// The capability snapshot could not be read after open.
    #[error("capability query failed")]
    CapabilityQueryFailed(#[source] Box<CaptureError>),

    /// The device rejected the format negotiation outright.
    #[error("format negotiation failed")]
    FormatNegotiationFailed(#[source] Box<CaptureError>),

    /// The driver granted fewer buffers than the double-buffering minimum.
    #[error("driver granted {granted} of {requested} requested buffers; at least 2 are required")]
    InsufficientBuffers {
        /// The number of buffers asked for.
        requested: u32,
        /// The number the driver actually reserved.
        granted: u32,
    },

    /// Mapping one buffer into process memory failed; every mapping made
    /// earlier in the same batch has already been unmapped.
    #[error("mapping buffer {index} failed")]
    MapFailed {
        /// Index of the buffer whose mapping failed.
        index: u32,
        /// The underlying device error.
        #[source]
        source: Box<CaptureError>,
    },

    /// Enqueueing the pool or switching the stream on failed.
    #[error("stream start failed")]
    StreamStartFailed(#[source] Box<CaptureError>),

    /// Switching the stream off failed.
    #[error("stream stop failed")]
    StreamStopFailed(#[source] Box<CaptureError>),

    /// A buffer was found in a state the two-queue protocol forbids for the
    /// attempted transition; this indicates a logic error, not a device
    /// failure.
    #[error("buffer {index} is {state:?}, invalid for {operation}")]
    BufferProtocol {
        /// The transition that was attempted.
        operation: &'static str,
        /// Index of the offending buffer.
        index: u32,
        /// The state the buffer was actually in.
        state: BufferState,
    },

    /// A frame operation was attempted while the engine is not streaming.
    #[error("engine is not streaming")]
    NotStreaming,

    /// An operation was attempted in a lifecycle state that does not
    /// support it.
    #[error("{operation} is invalid while the engine is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The engine state at the time.
        state: &'static str,
    },
}

impl CaptureError {
    pub(crate) const fn device(operation: &'static str, errno: Errno) -> Self {
        Self::Device { operation, errno }
    }

    /// The device errno behind this error, if it is a control failure.
    #[must_use]
    pub const fn errno(&self) -> Option<Errno> {
        match self {
            Self::Device { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
