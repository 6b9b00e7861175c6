//! Capture engine: device lifecycle, streaming state machine and the
//! frame acquisition protocol.

use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use tracing::{debug, warn};

use crate::control::{Capability, Dequeue, DeviceControl, V4l2Control};
use crate::error::{CaptureError, Result};
use crate::format::{Colorspace, FrameFormat, PixelFormat, Rect};
use crate::frame::Frame;
use crate::pool::BufferPool;

/// Buffers requested from the device: comfortably above the 2-buffer
/// minimum to absorb scheduling jitter.
pub const TARGET_BUFFER_COUNT: u32 = 10;

/// Consecutive busy dequeues tolerated before the condition is treated as a
/// structural device failure rather than jitter.
const BUSY_LIMIT: u32 = 32;

/// Lifecycle state of a [`CaptureEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Device open, nothing negotiated yet.
    Opened,
    /// Capability read, format negotiated, buffers mapped.
    Initialized,
    /// The device is filling buffers.
    Streaming,
    /// Streaming was stopped; buffers are still mapped.
    Stopped,
    /// All resources released.
    Closed,
}

impl EngineState {
    const fn name(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Initialized => "initialized",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
            Self::Closed => "closed",
        }
    }
}

/// Synchronous, single-threaded capture engine over one device.
///
/// Owns the device handle and the buffer pool exclusively; it is not meant
/// to be shared between threads without external synchronization. Frames
/// are acquired non-blocking: "nothing ready yet" is `Ok(None)`, never a
/// stall.
pub struct CaptureEngine<C: DeviceControl = V4l2Control> {
    control: C,
    state: EngineState,
    capability: Option<Capability>,
    format: Option<FrameFormat>,
    pool: Option<BufferPool>,
    desired_pixel_format: PixelFormat,
    desired_colorspace: Colorspace,
    desired_size: (u32, u32),
    default_rect: Option<Rect>,
    crop_active: bool,
    consecutive_busy: u32,
}

impl CaptureEngine<V4l2Control> {
    /// Conventional first capture device node.
    pub const DEFAULT_DEVICE: &'static str = "/dev/video0";

    /// Open the capture device at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_control(V4l2Control::open(path)?))
    }

    /// Open the conventional first capture device.
    pub fn open_default() -> Result<Self> {
        Self::open(Self::DEFAULT_DEVICE)
    }
}

impl<C: DeviceControl> CaptureEngine<C> {
    /// Build an engine over any control channel implementation.
    pub fn with_control(control: C) -> Self {
        Self {
            control,
            state: EngineState::Opened,
            capability: None,
            format: None,
            pool: None,
            desired_pixel_format: PixelFormat::Rgb24,
            desired_colorspace: Colorspace::Raw,
            desired_size: (1280, 720),
            default_rect: None,
            crop_active: false,
            consecutive_busy: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Capability snapshot, available after `initialize`.
    #[must_use]
    pub const fn capability(&self) -> Option<&Capability> {
        self.capability.as_ref()
    }

    /// Human-readable device name.
    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.capability.as_ref().map(Capability::card)
    }

    /// Kernel driver name.
    #[must_use]
    pub fn driver_name(&self) -> Option<&str> {
        self.capability.as_ref().map(Capability::driver)
    }

    /// Bus identifier.
    #[must_use]
    pub fn bus_info(&self) -> Option<&str> {
        self.capability.as_ref().map(Capability::bus_info)
    }

    /// The authoritative negotiated format. Re-query after any mutation:
    /// the device may have adjusted the request.
    #[must_use]
    pub const fn format(&self) -> Option<&FrameFormat> {
        self.format.as_ref()
    }

    /// Negotiated frame dimensions.
    #[must_use]
    pub fn size(&self) -> Option<(u32, u32)> {
        self.format.as_ref().map(|f| (f.width, f.height))
    }

    /// The device's default capture rectangle, when it reports one.
    #[must_use]
    pub const fn default_rect(&self) -> Option<Rect> {
        self.default_rect
    }

    /// Whether the device accepted a crop rectangle during initialization.
    #[must_use]
    pub const fn supports_cropping(&self) -> bool {
        self.crop_active
    }

    /// The crop rectangle currently configured on the device, or `None`
    /// when the device has no cropping support.
    pub fn crop_rect(&mut self) -> Result<Option<Rect>> {
        self.control.crop()
    }

    /// Select a sub-region of the sensor's capture area, best-effort.
    /// Returns `false` when the device has no cropping support; the device
    /// then keeps capturing its default rectangle.
    pub fn set_crop_rect(&mut self, rect: Rect) -> Result<bool> {
        let accepted = self.control.set_crop(rect)?;
        self.crop_active = accepted;
        Ok(accepted)
    }

    /// Query capability, negotiate the format, reserve and map the buffer
    /// pool. `Opened` → `Initialized`.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(EngineState::Opened, "initialize")?;

        let capability = self
            .control
            .query_capability()
            .map_err(|e| CaptureError::CapabilityQueryFailed(Box::new(e)))?;
        if !capability.supports_capture() {
            // Capability inspection still works; streaming will fail later.
            warn!(card = capability.card(), "device does not advertise video capture");
        }
        if !capability.supports_streaming() {
            warn!(card = capability.card(), "device does not advertise streaming I/O");
        }
        if !capability.supports_read_write() {
            debug!(card = capability.card(), "device has no read/write syscall interface");
        }
        self.capability = Some(capability);

        self.negotiate_format()?;
        self.apply_default_crop();

        self.pool = Some(BufferPool::allocate(&mut self.control, TARGET_BUFFER_COUNT)?);
        self.state = EngineState::Initialized;
        Ok(())
    }

    /// Queue every buffer to the device and switch streaming on.
    /// `Initialized`/`Stopped` → `Streaming`.
    pub fn start_streaming(&mut self) -> Result<()> {
        match self.state {
            EngineState::Initialized | EngineState::Stopped => {}
            EngineState::Streaming => return Ok(()),
            other => {
                return Err(CaptureError::InvalidState {
                    operation: "start_streaming",
                    state: other.name(),
                })
            }
        }

        let count = self.pool_len()?;
        // The device needs somewhere to write from the first cycle on, so
        // the whole pool goes in before stream-on. Failing any single
        // enqueue aborts the start; partial streaming is not attempted.
        for index in 0..count {
            self.control
                .enqueue(index)
                .map_err(|e| CaptureError::StreamStartFailed(Box::new(e)))?;
            if let Some(pool) = self.pool.as_mut() {
                pool.note_queued(index)?;
            }
        }
        self.control
            .stream_on()
            .map_err(|e| CaptureError::StreamStartFailed(Box::new(e)))?;
        self.consecutive_busy = 0;
        self.state = EngineState::Streaming;
        Ok(())
    }

    /// Switch streaming off. No-op success when not streaming.
    pub fn stop_streaming(&mut self) -> Result<()> {
        if self.state != EngineState::Streaming {
            return Ok(());
        }
        self.control
            .stream_off()
            .map_err(|e| CaptureError::StreamStopFailed(Box::new(e)))?;
        if let Some(pool) = self.pool.as_mut() {
            // Streamoff empties both kernel queues.
            pool.reset_states();
        }
        self.state = EngineState::Stopped;
        Ok(())
    }

    /// Dequeue one filled buffer, without blocking.
    ///
    /// `Ok(None)` means no frame is available yet — the device either had
    /// nothing ready or reported a transient busy condition, or it handed
    /// back a zero-byte capture (which is re-queued internally). Only a
    /// persistent busy run or a hard control failure is an error; neither
    /// tears down the stream, restarting is the caller's decision.
    pub fn acquire_frame(&mut self) -> Result<Option<Frame>> {
        if self.state != EngineState::Streaming {
            return Err(CaptureError::NotStreaming);
        }

        match self.control.dequeue()? {
            Dequeue::NotReady => {
                self.consecutive_busy = 0;
                Ok(None)
            }
            Dequeue::Busy => {
                self.consecutive_busy += 1;
                warn!(
                    run = self.consecutive_busy,
                    "device busy on dequeue, will retry"
                );
                if self.consecutive_busy >= BUSY_LIMIT {
                    return Err(CaptureError::device("VIDIOC_DQBUF", Errno::EBUSY));
                }
                Ok(None)
            }
            Dequeue::Captured(dequeued) => {
                self.consecutive_busy = 0;
                if let Some(pool) = self.pool.as_mut() {
                    pool.note_held(dequeued.index)?;
                }
                if dequeued.bytes_used == 0 {
                    // Nothing usable in it; put it straight back in rotation.
                    debug!(index = dequeued.index, "zero-byte capture re-queued");
                    self.control.enqueue(dequeued.index)?;
                    if let Some(pool) = self.pool.as_mut() {
                        pool.note_queued(dequeued.index)?;
                    }
                    return Ok(None);
                }
                Ok(Some(Frame::new(&dequeued)))
            }
        }
    }

    /// Return a frame's buffer to the device queue.
    ///
    /// Consumes the handle, so each acquired frame is released exactly
    /// once. After a stop the kernel queues are already empty and the slot
    /// simply becomes free again.
    pub fn release_frame(&mut self, frame: Frame) -> Result<()> {
        if self.state == EngineState::Streaming {
            self.control.enqueue(frame.index())?;
            if let Some(pool) = self.pool.as_mut() {
                pool.note_queued(frame.index())?;
            }
        } else if let Some(pool) = self.pool.as_mut() {
            pool.note_free(frame.index());
        }
        Ok(())
    }

    /// The filled bytes of an acquired frame. Empty once the engine has
    /// been closed.
    #[must_use]
    pub fn frame_data(&self, frame: &Frame) -> &[u8] {
        self.pool
            .as_ref()
            .and_then(|pool| pool.data(frame.index()))
            .and_then(|data| data.get(..frame.bytes_used() as usize))
            .unwrap_or(&[])
    }

    /// Wait up to `timeout` for the device to signal a readable frame.
    /// `Ok(false)` means the timeout elapsed; that is not a failure.
    pub fn wait_frame(&mut self, timeout: Duration) -> Result<bool> {
        if self.state != EngineState::Streaming {
            return Err(CaptureError::NotStreaming);
        }
        self.control.wait_readable(timeout)
    }

    /// Request a different pixel format. Renegotiates immediately when the
    /// engine is initialized; a running stream is stopped, renegotiated and
    /// restarted.
    pub fn set_pixel_format(&mut self, pixel_format: PixelFormat) -> Result<()> {
        self.desired_pixel_format = pixel_format;
        self.reconfigure()
    }

    /// Request different frame dimensions; same renegotiation rules as
    /// [`Self::set_pixel_format`].
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.desired_size = (width, height);
        self.reconfigure()
    }

    /// Request a different colorspace; same renegotiation rules as
    /// [`Self::set_pixel_format`].
    pub fn set_colorspace(&mut self, colorspace: Colorspace) -> Result<()> {
        self.desired_colorspace = colorspace;
        self.reconfigure()
    }

    /// Release every resource: stream, mappings, kernel reservation,
    /// descriptor. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        if self.state == EngineState::Streaming {
            if let Err(err) = self.control.stream_off() {
                debug!(error = %err, "stream-off during close failed");
            }
        }
        if let Some(pool) = self.pool.as_mut() {
            pool.release_all();
        }
        self.pool = None;
        let _ = self.control.request_buffers(0);
        self.control.close();
        self.capability = None;
        self.format = None;
        self.default_rect = None;
        self.crop_active = false;
        self.state = EngineState::Closed;
    }

    fn reconfigure(&mut self) -> Result<()> {
        match self.state {
            // Desires are applied when initialize negotiates.
            EngineState::Opened | EngineState::Closed => Ok(()),
            EngineState::Initialized | EngineState::Stopped => self.renegotiate(),
            EngineState::Streaming => {
                self.stop_streaming()?;
                self.renegotiate()?;
                self.start_streaming()
            }
        }
    }

    /// Mapped buffers pin the old geometry, so they are released and the
    /// kernel reservation freed before the new format goes in.
    fn renegotiate(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.as_mut() {
            pool.release_all();
        }
        self.pool = None;
        let _ = self.control.request_buffers(0);
        self.negotiate_format()?;
        self.pool = Some(BufferPool::allocate(&mut self.control, TARGET_BUFFER_COUNT)?);
        Ok(())
    }

    fn negotiate_format(&mut self) -> Result<()> {
        let (width, height) = self.desired_size;
        let requested = FrameFormat::new(
            width,
            height,
            self.desired_pixel_format,
            self.desired_colorspace,
        );
        let actual = self
            .control
            .set_format(&requested)
            .map_err(|e| CaptureError::FormatNegotiationFailed(Box::new(e)))?;
        if actual.width != requested.width
            || actual.height != requested.height
            || actual.pixel_format != requested.pixel_format
        {
            warn!(requested = %requested, actual = %actual, "device adjusted the negotiated format");
        }
        // The driver's answer is the only truth from here on.
        self.format = Some(actual);
        Ok(())
    }

    fn apply_default_crop(&mut self) {
        // Cropping is best-effort: devices without it fall back to their
        // default capture rectangle.
        match self.control.default_rect() {
            Ok(Some(rect)) => {
                self.default_rect = Some(rect);
                match self.control.set_crop(rect) {
                    Ok(active) => self.crop_active = active,
                    Err(err) => {
                        warn!(error = %err, "setting the default crop rectangle failed");
                        self.crop_active = false;
                    }
                }
            }
            Ok(None) => {
                debug!("device reports no cropping capability");
                self.crop_active = false;
            }
            Err(err) => {
                warn!(error = %err, "crop capability query failed");
                self.crop_active = false;
            }
        }
    }

    fn pool_len(&self) -> Result<u32> {
        self.pool
            .as_ref()
            .map(|pool| pool.len() as u32)
            .ok_or(CaptureError::InvalidState {
                operation: "start_streaming",
                state: self.state.name(),
            })
    }

    fn expect_state(&self, expected: EngineState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }
}

impl<C: DeviceControl> Drop for CaptureEngine<C> {
    fn drop(&mut self) {
        self.close();
    }
}
