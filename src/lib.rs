//! Vidcap: a V4L2 video capture engine with memory-mapped streaming I/O.
//!
//! The [`engine::CaptureEngine`] drives the full device protocol — open,
//! capability query, format negotiation, buffer reservation and mapping,
//! streaming, dequeue/requeue, teardown — over a non-blocking descriptor.
//! The control channel is a trait, so everything above the ioctl layer is
//! testable without hardware.

pub mod control;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod format;
pub mod frame;
pub mod pool;
pub mod validation;

mod sys;

#[cfg(test)]
pub mod mock;

pub use control::{BufferDescriptor, Capability, Dequeue, Dequeued, DeviceControl, V4l2Control};
pub use decode::{decode, DecodeError, RgbImage};
pub use device::DeviceHandle;
pub use engine::{CaptureEngine, EngineState, TARGET_BUFFER_COUNT};
pub use error::{CaptureError, Result};
pub use format::{Colorspace, FrameFormat, PixelFormat, Rect};
pub use frame::Frame;
pub use pool::{BufferPool, BufferState, MappedBuffer, MIN_BUFFERS};
