//! Control channel: the device request vocabulary and its V4L2 binding.
//!
//! Every request goes through one retry wrapper that transparently absorbs
//! signal interruptions (`EINTR`) with a small fixed bound and no backoff.
//! Any other failure surfaces as [`CaptureError::Device`] naming the
//! request; nothing is hidden from the caller.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::mman::{mmap, MapFlags, ProtFlags};
use tracing::debug;

use crate::device::DeviceHandle;
use crate::error::{CaptureError, Result};
use crate::format::{FrameFormat, Rect};
use crate::pool::MappedBuffer;
use crate::sys;

/// Bounded retry for requests interrupted by a signal; interruption is
/// expected to be transient and rare.
const INTERRUPT_RETRIES: u32 = 4;

/// Immutable capability snapshot, read once after open.
#[derive(Debug, Clone)]
pub struct Capability {
    card: String,
    driver: String,
    bus_info: String,
    raw: u32,
}

impl Capability {
    pub(crate) fn new(card: String, driver: String, bus_info: String, raw: u32) -> Self {
        Self {
            card,
            driver,
            bus_info,
            raw,
        }
    }

    fn from_sys(caps: &sys::v4l2_capability) -> Self {
        Self::new(
            text_field(&caps.card),
            text_field(&caps.driver),
            text_field(&caps.bus_info),
            caps.capabilities,
        )
    }

    /// Human-readable device name.
    #[must_use]
    pub fn card(&self) -> &str {
        &self.card
    }

    /// Kernel driver name.
    #[must_use]
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Bus identifier (e.g. `usb-0000:00:14.0-1`).
    #[must_use]
    pub fn bus_info(&self) -> &str {
        &self.bus_info
    }

    /// The raw capability bit set.
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Whether the device can capture video.
    #[must_use]
    pub const fn supports_capture(&self) -> bool {
        self.raw & sys::V4L2_CAP_VIDEO_CAPTURE != 0
    }

    /// Whether the device supports streaming I/O.
    #[must_use]
    pub const fn supports_streaming(&self) -> bool {
        self.raw & sys::V4L2_CAP_STREAMING != 0
    }

    /// Whether the device supports the read/write syscall interface.
    #[must_use]
    pub const fn supports_read_write(&self) -> bool {
        self.raw & sys::V4L2_CAP_READWRITE != 0
    }

    /// Whether the device supports asynchronous I/O.
    #[must_use]
    pub const fn supports_async_io(&self) -> bool {
        self.raw & sys::V4L2_CAP_ASYNCIO != 0
    }

    /// Whether the device is a memory-to-memory device.
    #[must_use]
    pub const fn supports_mem_to_mem(&self) -> bool {
        self.raw & sys::V4L2_CAP_VIDEO_M2M != 0
    }

    /// Whether the device has video overlay support.
    #[must_use]
    pub const fn supports_overlay(&self) -> bool {
        self.raw & sys::V4L2_CAP_VIDEO_OVERLAY != 0
    }

    /// Whether the device understands the extended pixel format fields.
    #[must_use]
    pub const fn supports_extended_pixel_format(&self) -> bool {
        self.raw & sys::V4L2_CAP_EXT_PIX_FORMAT != 0
    }

    /// Whether the device reports per-node capabilities.
    #[must_use]
    pub const fn has_device_caps(&self) -> bool {
        self.raw & sys::V4L2_CAP_DEVICE_CAPS != 0
    }
}

fn text_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(bytes.get(..end).unwrap_or_default()).into_owned()
}

/// Kernel-side descriptor of one buffer: where it lives and how big it is.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor {
    /// Buffer index, stable for the device's lifetime.
    pub index: u32,
    /// Offset used as the mmap cookie.
    pub offset: u32,
    /// Length of the buffer in bytes.
    pub length: u32,
}

/// A buffer the device has finished filling.
#[derive(Debug, Clone, Copy)]
pub struct Dequeued {
    /// Index of the filled buffer.
    pub index: u32,
    /// Number of valid bytes the device wrote.
    pub bytes_used: u32,
    /// Driver frame counter.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Outcome of a single non-blocking dequeue attempt.
#[derive(Debug, Clone, Copy)]
pub enum Dequeue {
    /// A filled buffer was handed out.
    Captured(Dequeued),
    /// No buffer is ready yet; the caller polls or retries later.
    NotReady,
    /// The device reported it is busy; recoverable, retry later.
    Busy,
}

/// The device request vocabulary the engine and pool program against.
///
/// [`V4l2Control`] binds it to a real capture node; the test double in
/// `mock` implements it without hardware.
pub trait DeviceControl {
    /// Query the capability snapshot.
    fn query_capability(&mut self) -> Result<Capability>;

    /// Read the device's current capture format.
    fn format(&mut self) -> Result<FrameFormat>;

    /// Negotiate a capture format.
    ///
    /// Returns the format the driver actually configured, which may differ
    /// from the request; the returned values are the only truth.
    fn set_format(&mut self, requested: &FrameFormat) -> Result<FrameFormat>;

    /// Ask the device to reserve `count` memory-mapped buffers; returns the
    /// granted count, which may be lower. A count of zero frees the
    /// reservation.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Query the kernel-side descriptor for one reserved buffer.
    fn query_buffer(&mut self, index: u32) -> Result<BufferDescriptor>;

    /// Map a reserved buffer into process memory, shared with the kernel.
    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<MappedBuffer>;

    /// Hand a buffer to the device's incoming queue for filling.
    fn enqueue(&mut self, index: u32) -> Result<()>;

    /// Take one filled buffer from the device's outgoing queue, without
    /// blocking.
    fn dequeue(&mut self) -> Result<Dequeue>;

    /// Start streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Stop streaming; the kernel forgets both queues.
    fn stream_off(&mut self) -> Result<()>;

    /// The device's default capture rectangle, or `None` when the device
    /// has no cropping support.
    fn default_rect(&mut self) -> Result<Option<Rect>>;

    /// The current crop rectangle, or `None` when unsupported.
    fn crop(&mut self) -> Result<Option<Rect>>;

    /// Set the crop rectangle. Returns `false` when the device does not
    /// support cropping — degradation, not an error.
    fn set_crop(&mut self, rect: Rect) -> Result<bool>;

    /// Wait up to `timeout` for the device to become readable. `Ok(false)`
    /// means the timeout elapsed, which is not a failure.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Release the underlying descriptor. Safe to call more than once.
    fn close(&mut self);
}

/// Control channel over a real V4L2 capture node.
#[derive(Debug)]
pub struct V4l2Control {
    device: DeviceHandle,
}

impl V4l2Control {
    /// Open the capture node at `path` and wrap it in a control channel.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            device: DeviceHandle::open(path)?,
        })
    }

    /// The underlying device handle.
    #[must_use]
    pub const fn device(&self) -> &DeviceHandle {
        &self.device
    }

    fn ioctl<F>(&self, operation: &'static str, mut request: F) -> Result<()>
    where
        F: FnMut(libc::c_int) -> nix::Result<libc::c_int>,
    {
        let fd = self
            .device
            .raw_fd()
            .ok_or(CaptureError::device(operation, Errno::EBADF))?;
        for _ in 0..=INTERRUPT_RETRIES {
            match request(fd) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(CaptureError::device(operation, errno)),
            }
        }
        Err(CaptureError::device(operation, Errno::EINTR))
    }
}

/// Errnos that mean "this device has no such feature" for optional
/// requests like cropping.
const fn is_unsupported(errno: Errno) -> bool {
    matches!(errno, Errno::EINVAL | Errno::ENOTTY | Errno::EOPNOTSUPP)
}

impl DeviceControl for V4l2Control {
    fn query_capability(&mut self) -> Result<Capability> {
        let mut caps: sys::v4l2_capability =
            // SAFETY: all-zero bytes are valid for every field.
            unsafe { std::mem::zeroed() };
        self.ioctl("VIDIOC_QUERYCAP", |fd| {
            // SAFETY: `caps` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_querycap(fd, &mut caps) }
        })?;
        Ok(Capability::from_sys(&caps))
    }

    fn format(&mut self) -> Result<FrameFormat> {
        let mut fmt = sys::v4l2_format::zeroed();
        fmt.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        self.ioctl("VIDIOC_G_FMT", |fd| {
            // SAFETY: `fmt` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_g_fmt(fd, &mut fmt) }
        })?;
        // SAFETY: the capture buffer type selects the `pix` union variant.
        Ok(FrameFormat::from_pix(unsafe { &fmt.fmt.pix }))
    }

    fn set_format(&mut self, requested: &FrameFormat) -> Result<FrameFormat> {
        // Read-modify-write so driver-private fields survive negotiation.
        let mut fmt = sys::v4l2_format::zeroed();
        fmt.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        self.ioctl("VIDIOC_G_FMT", |fd| {
            // SAFETY: `fmt` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_g_fmt(fd, &mut fmt) }
        })?;
        // SAFETY: the capture buffer type selects the `pix` union variant.
        requested.apply_to_pix(unsafe { &mut fmt.fmt.pix });
        self.ioctl("VIDIOC_S_FMT", |fd| {
            // SAFETY: `fmt` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_s_fmt(fd, &mut fmt) }
        })?;
        // SAFETY: the capture buffer type selects the `pix` union variant.
        Ok(FrameFormat::from_pix(unsafe { &fmt.fmt.pix }))
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        let mut req = sys::v4l2_requestbuffers::zeroed();
        req.count = count;
        req.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        req.memory = sys::V4L2_MEMORY_MMAP;
        self.ioctl("VIDIOC_REQBUFS", |fd| {
            // SAFETY: `req` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_reqbufs(fd, &mut req) }
        })?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> Result<BufferDescriptor> {
        let mut buf = sys::v4l2_buffer::zeroed();
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        buf.index = index;
        self.ioctl("VIDIOC_QUERYBUF", |fd| {
            // SAFETY: `buf` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_querybuf(fd, &mut buf) }
        })?;
        Ok(BufferDescriptor {
            index,
            // SAFETY: MMAP memory selects the `offset` union variant.
            offset: unsafe { buf.m.offset },
            length: buf.length,
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<MappedBuffer> {
        let fd = self
            .device
            .fd()
            .ok_or(CaptureError::device("mmap", Errno::EBADF))?;
        let length = NonZeroUsize::new(descriptor.length as usize)
            .ok_or(CaptureError::device("mmap", Errno::EINVAL))?;
        // SAFETY: the descriptor came from VIDIOC_QUERYBUF, so offset and
        // length describe a region the driver exports for mapping.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                libc::off_t::from(descriptor.offset),
            )
        }
        .map_err(|errno| CaptureError::device("mmap", errno))?;
        // SAFETY: `ptr` is a fresh mapping of exactly `length` bytes that
        // nothing else owns.
        Ok(unsafe { MappedBuffer::from_mmap(ptr.cast(), length.get()) })
    }

    fn enqueue(&mut self, index: u32) -> Result<()> {
        let mut buf = sys::v4l2_buffer::zeroed();
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        buf.index = index;
        self.ioctl("VIDIOC_QBUF", |fd| {
            // SAFETY: `buf` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_qbuf(fd, &mut buf) }
        })
    }

    fn dequeue(&mut self) -> Result<Dequeue> {
        let mut buf = sys::v4l2_buffer::zeroed();
        buf.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = sys::V4L2_MEMORY_MMAP;
        let outcome = self.ioctl("VIDIOC_DQBUF", |fd| {
            // SAFETY: `buf` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_dqbuf(fd, &mut buf) }
        });
        match outcome {
            Ok(()) => {
                #[allow(clippy::cast_sign_loss)]
                let secs = buf.timestamp.tv_sec.max(0) as u64;
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let nanos = (buf.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);
                Ok(Dequeue::Captured(Dequeued {
                    index: buf.index,
                    bytes_used: buf.bytesused,
                    sequence: buf.sequence,
                    timestamp: Duration::new(secs, nanos),
                }))
            }
            Err(CaptureError::Device {
                errno: Errno::EAGAIN,
                ..
            }) => Ok(Dequeue::NotReady),
            Err(CaptureError::Device {
                errno: Errno::EBUSY,
                ..
            }) => Ok(Dequeue::Busy),
            Err(err) => Err(err),
        }
    }

    fn stream_on(&mut self) -> Result<()> {
        let kind = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        self.ioctl("VIDIOC_STREAMON", |fd| {
            // SAFETY: `kind` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_streamon(fd, &kind) }
        })
    }

    fn stream_off(&mut self) -> Result<()> {
        let kind = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        self.ioctl("VIDIOC_STREAMOFF", |fd| {
            // SAFETY: `kind` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_streamoff(fd, &kind) }
        })
    }

    fn default_rect(&mut self) -> Result<Option<Rect>> {
        let mut cropcap = sys::v4l2_cropcap::zeroed();
        cropcap.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        let outcome = self.ioctl("VIDIOC_CROPCAP", |fd| {
            // SAFETY: `cropcap` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_cropcap(fd, &mut cropcap) }
        });
        match outcome {
            Ok(()) => Ok(Some(Rect::from_sys(&cropcap.defrect))),
            Err(CaptureError::Device { errno, .. }) if is_unsupported(errno) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn crop(&mut self) -> Result<Option<Rect>> {
        let mut crop = sys::v4l2_crop::zeroed();
        crop.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        let outcome = self.ioctl("VIDIOC_G_CROP", |fd| {
            // SAFETY: `crop` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_g_crop(fd, &mut crop) }
        });
        match outcome {
            Ok(()) => Ok(Some(Rect::from_sys(&crop.c))),
            Err(CaptureError::Device { errno, .. }) if is_unsupported(errno) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set_crop(&mut self, rect: Rect) -> Result<bool> {
        let mut crop = sys::v4l2_crop::zeroed();
        crop.type_ = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE;
        crop.c = rect.to_sys();
        let outcome = self.ioctl("VIDIOC_S_CROP", |fd| {
            // SAFETY: `crop` outlives the call and matches the request's
            // argument type.
            unsafe { sys::vidioc_s_crop(fd, &crop) }
        });
        match outcome {
            Ok(()) => Ok(true),
            Err(CaptureError::Device { errno, .. }) if is_unsupported(errno) => {
                debug!("device has no cropping support, using its default rectangle");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        let fd = self
            .device
            .fd()
            .ok_or(CaptureError::device("poll", Errno::EBADF))?;
        #[allow(clippy::cast_possible_truncation)]
        let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        for _ in 0..=INTERRUPT_RETRIES {
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(CaptureError::device("poll", errno)),
            }
        }
        Err(CaptureError::device("poll", Errno::EINTR))
    }

    fn close(&mut self) {
        self.device.close();
    }
}
