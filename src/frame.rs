//! Frame handle: a short-lived, non-duplicable view over one filled buffer.

use std::time::Duration;

use crate::control::Dequeued;

/// A dequeued frame.
///
/// The handle is a move-only token for exactly one buffer: it cannot be
/// cloned, and [`CaptureEngine::release_frame`](crate::engine::CaptureEngine::release_frame)
/// consumes it, so a buffer can be released at most once. The frame's bytes
/// are read through [`CaptureEngine::frame_data`](crate::engine::CaptureEngine::frame_data),
/// which ties the borrow to the engine that owns the mapping.
#[derive(Debug)]
pub struct Frame {
    index: u32,
    bytes_used: u32,
    sequence: u32,
    timestamp: Duration,
}

impl Frame {
    pub(crate) const fn new(dequeued: &Dequeued) -> Self {
        Self {
            index: dequeued.index,
            bytes_used: dequeued.bytes_used,
            sequence: dequeued.sequence,
            timestamp: dequeued.timestamp,
        }
    }

    /// Index of the buffer backing this frame.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Number of valid bytes the device wrote for this capture.
    #[must_use]
    pub const fn bytes_used(&self) -> u32 {
        self.bytes_used
    }

    /// Driver frame counter.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Capture timestamp reported by the driver.
    #[must_use]
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Whether the device reported zero valid bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes_used == 0
    }
}
