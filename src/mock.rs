//! Mock control channel for testing without hardware.

use std::collections::VecDeque;
use std::time::Duration;

use nix::errno::Errno;

use crate::control::{
    BufferDescriptor, Capability, Dequeue, Dequeued, DeviceControl,
};
use crate::error::{CaptureError, Result};
use crate::format::{Colorspace, FrameFormat, PixelFormat, Rect};
use crate::pool::MappedBuffer;
use crate::sys;

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock implementation of [`DeviceControl`] with scriptable failure modes.
///
/// Buffers are heap-backed; dequeues by default treat every queued buffer
/// as instantly filled, while [`MockControl::manual_ready`] switches to an
/// explicit ready queue for would-block scenarios.
pub struct MockControl {
    capability_bits: u32,
    format: FrameFormat,
    pattern: TestPattern,
    grant: u32,
    clamp: Option<(u32, u32)>,
    map_fail_index: Option<u32>,
    stream_on_fails: bool,
    crop_supported: bool,
    auto_fill: bool,

    streaming: bool,
    closed: bool,
    device_queue: VecDeque<u32>,
    ready: VecDeque<u32>,
    enqueued_order: Vec<u32>,
    request_counts: Vec<u32>,
    next_bytes_used: Option<u32>,
    busy_runs: u32,
    sequence: u32,
}

impl Default for MockControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControl {
    /// Create a mock capture-and-streaming device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capability_bits: sys::V4L2_CAP_VIDEO_CAPTURE | sys::V4L2_CAP_STREAMING,
            format: FrameFormat::new(640, 480, PixelFormat::Yuyv, Colorspace::Raw),
            pattern: TestPattern::ColorBars,
            grant: 32,
            clamp: None,
            map_fail_index: None,
            stream_on_fails: false,
            crop_supported: true,
            auto_fill: true,
            streaming: false,
            closed: false,
            device_queue: VecDeque::new(),
            ready: VecDeque::new(),
            enqueued_order: Vec::new(),
            request_counts: Vec::new(),
            next_bytes_used: None,
            busy_runs: 0,
            sequence: 0,
        }
    }

    /// Set the device-side format this mock starts with.
    #[must_use]
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the test pattern used to fill mapped buffers.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Cap the number of buffers the driver grants.
    #[must_use]
    pub const fn with_grant(mut self, grant: u32) -> Self {
        self.grant = grant;
        self
    }

    /// Clamp negotiated dimensions, mimicking driver-side adjustment.
    #[must_use]
    pub const fn with_clamp(mut self, width: u32, height: u32) -> Self {
        self.clamp = Some((width, height));
        self
    }

    /// Make mapping the buffer at `index` fail.
    #[must_use]
    pub const fn with_map_failure(mut self, index: u32) -> Self {
        self.map_fail_index = Some(index);
        self
    }

    /// Drop the capture capability bit.
    #[must_use]
    pub const fn without_capture(mut self) -> Self {
        self.capability_bits &= !sys::V4L2_CAP_VIDEO_CAPTURE;
        self
    }

    /// Make stream-on fail.
    #[must_use]
    pub const fn with_stream_on_failure(mut self) -> Self {
        self.stream_on_fails = true;
        self
    }

    /// Report no cropping support.
    #[must_use]
    pub const fn without_cropping(mut self) -> Self {
        self.crop_supported = false;
        self
    }

    /// Frames become ready only via [`MockControl::make_ready`] instead of
    /// instantly.
    #[must_use]
    pub const fn manual_ready(mut self) -> Self {
        self.auto_fill = false;
        self
    }

    /// Move up to `count` queued buffers into the ready queue.
    pub fn make_ready(&mut self, count: usize) {
        for _ in 0..count {
            match self.device_queue.pop_front() {
                Some(index) => self.ready.push_back(index),
                None => break,
            }
        }
    }

    /// Report `bytes` as the filled size of the next dequeued frame.
    pub fn set_next_bytes_used(&mut self, bytes: u32) {
        self.next_bytes_used = Some(bytes);
    }

    /// Answer the next `runs` dequeues with a busy condition.
    pub fn set_busy_runs(&mut self, runs: u32) {
        self.busy_runs = runs;
    }

    /// Every `request_buffers` count seen, in call order.
    #[must_use]
    pub fn request_counts(&self) -> &[u32] {
        &self.request_counts
    }

    /// Every enqueued index, in call order.
    #[must_use]
    pub fn enqueued_order(&self) -> &[u32] {
        &self.enqueued_order
    }

    /// Buffers currently in the device's incoming queue.
    #[must_use]
    pub fn device_queue_len(&self) -> usize {
        self.device_queue.len() + self.ready.len()
    }

    /// Whether streaming is switched on.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether the descriptor was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.closed {
            return Err(CaptureError::device(operation, Errno::EBADF));
        }
        Ok(())
    }

    fn buffer_len(&self) -> u32 {
        if self.format.size == 0 {
            1 << 16
        } else {
            self.format.size
        }
    }
}

impl DeviceControl for MockControl {
    fn query_capability(&mut self) -> Result<Capability> {
        self.ensure_open("VIDIOC_QUERYCAP")?;
        Ok(Capability::new(
            "Mock Camera".to_owned(),
            "mock".to_owned(),
            "mock:0".to_owned(),
            self.capability_bits,
        ))
    }

    fn format(&mut self) -> Result<FrameFormat> {
        self.ensure_open("VIDIOC_G_FMT")?;
        Ok(self.format.clone())
    }

    fn set_format(&mut self, requested: &FrameFormat) -> Result<FrameFormat> {
        self.ensure_open("VIDIOC_S_FMT")?;
        let (mut width, mut height) = (requested.width, requested.height);
        if let Some((max_width, max_height)) = self.clamp {
            width = width.min(max_width);
            height = height.min(max_height);
        }
        self.format = FrameFormat::new(
            width,
            height,
            requested.pixel_format,
            requested.colorspace,
        );
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.ensure_open("VIDIOC_REQBUFS")?;
        self.request_counts.push(count);
        if count == 0 {
            return Ok(0);
        }
        Ok(count.min(self.grant))
    }

    fn query_buffer(&mut self, index: u32) -> Result<BufferDescriptor> {
        self.ensure_open("VIDIOC_QUERYBUF")?;
        let length = self.buffer_len();
        Ok(BufferDescriptor {
            index,
            offset: index * length,
            length,
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<MappedBuffer> {
        self.ensure_open("mmap")?;
        if self.map_fail_index == Some(descriptor.index) {
            return Err(CaptureError::device("mmap", Errno::ENOMEM));
        }
        let mut data = generate_test_frame(&self.format, self.pattern);
        data.resize(descriptor.length as usize, 0);
        Ok(MappedBuffer::from_vec(data))
    }

    fn enqueue(&mut self, index: u32) -> Result<()> {
        self.ensure_open("VIDIOC_QBUF")?;
        if self.device_queue.contains(&index) || self.ready.contains(&index) {
            return Err(CaptureError::device("VIDIOC_QBUF", Errno::EINVAL));
        }
        self.enqueued_order.push(index);
        self.device_queue.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Dequeue> {
        self.ensure_open("VIDIOC_DQBUF")?;
        if !self.streaming {
            return Err(CaptureError::device("VIDIOC_DQBUF", Errno::EINVAL));
        }
        if self.busy_runs > 0 {
            self.busy_runs -= 1;
            return Ok(Dequeue::Busy);
        }
        let next = if self.auto_fill {
            self.device_queue.pop_front()
        } else {
            self.ready.pop_front()
        };
        let Some(index) = next else {
            return Ok(Dequeue::NotReady);
        };
        let bytes_used = self.next_bytes_used.take().unwrap_or_else(|| self.buffer_len());
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(Dequeue::Captured(Dequeued {
            index,
            bytes_used,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
        }))
    }

    fn stream_on(&mut self) -> Result<()> {
        self.ensure_open("VIDIOC_STREAMON")?;
        if self.stream_on_fails {
            return Err(CaptureError::device("VIDIOC_STREAMON", Errno::EINVAL));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.ensure_open("VIDIOC_STREAMOFF")?;
        self.streaming = false;
        self.device_queue.clear();
        self.ready.clear();
        Ok(())
    }

    fn default_rect(&mut self) -> Result<Option<Rect>> {
        self.ensure_open("VIDIOC_CROPCAP")?;
        if !self.crop_supported {
            return Ok(None);
        }
        Ok(Some(Rect {
            left: 0,
            top: 0,
            width: self.format.width,
            height: self.format.height,
        }))
    }

    fn crop(&mut self) -> Result<Option<Rect>> {
        self.default_rect()
    }

    fn set_crop(&mut self, _rect: Rect) -> Result<bool> {
        self.ensure_open("VIDIOC_S_CROP")?;
        Ok(self.crop_supported)
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool> {
        self.ensure_open("poll")?;
        if !self.streaming {
            return Ok(false);
        }
        if self.auto_fill {
            Ok(!self.device_queue.is_empty())
        } else {
            Ok(!self.ready.is_empty())
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.streaming = false;
        self.device_queue.clear();
        self.ready.clear();
    }
}

/// Generate test frame data based on pattern. YUYV formats get the full
/// pattern; anything else gets zero fill sized to the format.
#[must_use]
pub fn generate_test_frame(format: &FrameFormat, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];
    if format.pixel_format != PixelFormat::Yuyv {
        return data;
    }

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format.width, format.height),
        TestPattern::Gradient => generate_gradient(&mut data, format.width, format.height),
        TestPattern::Solid(y, u, v) => generate_solid(&mut data, y, u, v),
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    // YUYV values for each bar
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = width / 8;

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val; // Y0
                data[offset + 1] = u_val; // U
                data[offset + 2] = y_val; // Y1
                data[offset + 3] = v_val; // V
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val; // Y0
                data[offset + 1] = 128; // U (neutral)
                data[offset + 2] = y_val; // Y1
                data[offset + 3] = 128; // V (neutral)
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for group in data.chunks_exact_mut(4) {
        group[0] = y; // Y0
        group[1] = u; // U
        group[2] = y; // Y1
        group[3] = v; // V
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reports_its_capabilities() {
        let mut control = MockControl::new();
        let caps = control.query_capability().expect("query failed");
        assert_eq!(caps.driver(), "mock");
        assert!(caps.supports_capture());
        assert!(caps.supports_streaming());

        let caps = MockControl::new()
            .without_capture()
            .query_capability()
            .expect("query failed");
        assert!(!caps.supports_capture());
    }

    #[test]
    fn mock_applies_format_clamping() {
        let mut control = MockControl::new().with_clamp(640, 480);
        let requested = FrameFormat::new(1920, 1080, PixelFormat::Yuyv, Colorspace::Raw);
        let actual = control.set_format(&requested).expect("set_format failed");
        assert_eq!((actual.width, actual.height), (640, 480));
        assert_eq!(actual.pixel_format, PixelFormat::Yuyv);
    }

    #[test]
    fn mock_rejects_double_enqueue() {
        let mut control = MockControl::new();
        control.enqueue(3).expect("first enqueue");
        assert!(control.enqueue(3).is_err());
    }

    #[test]
    fn mock_dequeue_requires_streaming() {
        let mut control = MockControl::new();
        control.enqueue(0).expect("enqueue failed");
        assert!(control.dequeue().is_err());

        control.stream_on().expect("stream_on failed");
        assert!(matches!(
            control.dequeue().expect("dequeue failed"),
            Dequeue::Captured(_)
        ));
    }

    #[test]
    fn color_bars_pattern_has_expected_shape() {
        let format = FrameFormat::new(640, 480, PixelFormat::Yuyv, Colorspace::Raw);
        let data = generate_test_frame(&format, TestPattern::ColorBars);
        assert_eq!(data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn gradient_pattern_ramps_left_to_right() {
        let format = FrameFormat::new(640, 480, PixelFormat::Yuyv, Colorspace::Raw);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn solid_pattern_fills_uniformly() {
        let format = FrameFormat::new(64, 64, PixelFormat::Yuyv, Colorspace::Raw);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));
        assert_eq!(data[0], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[2], 128);
        assert_eq!(data[3], 192);
    }
}
