//! Pixel formats, colorspaces and the negotiated frame geometry.

use std::fmt;

use crate::sys;

/// Pixel encoding of a captured frame, identified by its fourcc code.
///
/// Codes the driver reports that are not in this vocabulary are preserved
/// verbatim as [`PixelFormat::Other`] rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 24-bit RGB, 3 bytes per pixel (`RGB3`).
    Rgb24,
    /// 24-bit BGR, 3 bytes per pixel (`BGR3`).
    Bgr24,
    /// 8-bit greyscale (`GREY`).
    Grey,
    /// Packed 4:2:2 YUV, 2 bytes per pixel (`YUYV`).
    Yuyv,
    /// Packed 4:2:2 YUV with swapped chroma (`YVYU`).
    Yvyu,
    /// Packed 4:2:2 YUV, chroma first (`UYVY`).
    Uyvy,
    /// Planar 4:2:0 YUV (`YU12`).
    Yuv420,
    /// Semi-planar 4:2:0 YUV (`NV12`).
    Nv12,
    /// Motion-JPEG compressed frames (`MJPG`).
    Mjpeg,
    /// JPEG compressed frames (`JPEG`).
    Jpeg,
    /// MPEG elementary stream (`MPEG`).
    Mpeg,
    /// H.264 bitstream (`H264`).
    H264,
    /// Any other fourcc code, kept as reported by the driver.
    Other(u32),
}

impl PixelFormat {
    /// The fourcc code for this format.
    #[must_use]
    pub const fn fourcc(self) -> u32 {
        match self {
            Self::Rgb24 => sys::fourcc(*b"RGB3"),
            Self::Bgr24 => sys::fourcc(*b"BGR3"),
            Self::Grey => sys::fourcc(*b"GREY"),
            Self::Yuyv => sys::fourcc(*b"YUYV"),
            Self::Yvyu => sys::fourcc(*b"YVYU"),
            Self::Uyvy => sys::fourcc(*b"UYVY"),
            Self::Yuv420 => sys::fourcc(*b"YU12"),
            Self::Nv12 => sys::fourcc(*b"NV12"),
            Self::Mjpeg => sys::fourcc(*b"MJPG"),
            Self::Jpeg => sys::fourcc(*b"JPEG"),
            Self::Mpeg => sys::fourcc(*b"MPEG"),
            Self::H264 => sys::fourcc(*b"H264"),
            Self::Other(code) => code,
        }
    }

    /// Map a fourcc code back into the vocabulary; unknown codes survive as
    /// [`PixelFormat::Other`].
    #[must_use]
    pub const fn from_fourcc(code: u32) -> Self {
        match &code.to_le_bytes() {
            b"RGB3" => Self::Rgb24,
            b"BGR3" => Self::Bgr24,
            b"GREY" => Self::Grey,
            b"YUYV" => Self::Yuyv,
            b"YVYU" => Self::Yvyu,
            b"UYVY" => Self::Uyvy,
            b"YU12" => Self::Yuv420,
            b"NV12" => Self::Nv12,
            b"MJPG" => Self::Mjpeg,
            b"JPEG" => Self::Jpeg,
            b"MPEG" => Self::Mpeg,
            b"H264" => Self::H264,
            _ => Self::Other(code),
        }
    }

    /// Whether frames in this format carry a compressed bitstream whose
    /// per-frame size varies.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Mjpeg | Self::Jpeg | Self::Mpeg | Self::H264)
    }

    /// Bytes per pixel for packed raw formats; `None` for planar or
    /// compressed encodings where the notion does not apply.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Self::Rgb24 | Self::Bgr24 => Some(3),
            Self::Yuyv | Self::Yvyu | Self::Uyvy => Some(2),
            Self::Grey => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.fourcc().to_le_bytes();
        match std::str::from_utf8(&bytes) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "0x{:08x}", self.fourcc()),
        }
    }
}

/// Color encoding of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    /// Let the driver pick.
    Default,
    /// Standard sRGB.
    Srgb,
    /// AdobeRGB / opRGB.
    AdobeRgb,
    /// The JPEG variant of sRGB.
    Jpeg,
    /// No colorspace processing at all.
    Raw,
    /// Any other value, kept as reported by the driver.
    Other(u32),
}

impl Colorspace {
    /// The raw `v4l2_colorspace` value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Default => sys::V4L2_COLORSPACE_DEFAULT,
            Self::Srgb => sys::V4L2_COLORSPACE_SRGB,
            Self::AdobeRgb => sys::V4L2_COLORSPACE_ADOBERGB,
            Self::Jpeg => sys::V4L2_COLORSPACE_JPEG,
            Self::Raw => sys::V4L2_COLORSPACE_RAW,
            Self::Other(value) => value,
        }
    }

    /// Map a raw `v4l2_colorspace` value back into the vocabulary.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        match value {
            sys::V4L2_COLORSPACE_DEFAULT => Self::Default,
            sys::V4L2_COLORSPACE_SRGB => Self::Srgb,
            sys::V4L2_COLORSPACE_ADOBERGB => Self::AdobeRgb,
            sys::V4L2_COLORSPACE_JPEG => Self::Jpeg,
            sys::V4L2_COLORSPACE_RAW => Self::Raw,
            other => Self::Other(other),
        }
    }
}

/// A rectangle in sensor coordinates, used for cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Horizontal offset of the top-left corner.
    pub left: i32,
    /// Vertical offset of the top-left corner.
    pub top: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    pub(crate) const fn from_sys(rect: &sys::v4l2_rect) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            width: rect.width,
            height: rect.height,
        }
    }

    pub(crate) const fn to_sys(self) -> sys::v4l2_rect {
        sys::v4l2_rect {
            left: self.left,
            top: self.top,
            width: self.width,
            height: self.height,
        }
    }
}

/// The negotiated capture format.
///
/// Instances come from the device: after every negotiation the driver's
/// returned values are adopted verbatim, so `stride` and `size` reflect what
/// the device will actually produce, not an estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    /// Pixel encoding.
    pub pixel_format: PixelFormat,
    /// Color encoding.
    pub colorspace: Colorspace,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per line; 0 for compressed formats.
    pub stride: u32,
    /// Total image size in bytes the driver reserves per frame.
    pub size: u32,
}

impl FrameFormat {
    /// Build a format request. Stride and size are estimates for packed raw
    /// formats and zero otherwise; the driver overwrites both during
    /// negotiation.
    #[must_use]
    pub const fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        colorspace: Colorspace,
    ) -> Self {
        let stride = match pixel_format.bytes_per_pixel() {
            Some(bpp) => width * bpp,
            None => 0,
        };
        Self {
            pixel_format,
            colorspace,
            width,
            height,
            stride,
            size: stride * height,
        }
    }

    pub(crate) fn from_pix(pix: &sys::v4l2_pix_format) -> Self {
        Self {
            pixel_format: PixelFormat::from_fourcc(pix.pixelformat),
            colorspace: Colorspace::from_raw(pix.colorspace),
            width: pix.width,
            height: pix.height,
            stride: pix.bytesperline,
            size: pix.sizeimage,
        }
    }

    pub(crate) fn apply_to_pix(&self, pix: &mut sys::v4l2_pix_format) {
        pix.width = self.width;
        pix.height = self.height;
        pix.pixelformat = self.pixel_format.fourcc();
        pix.colorspace = self.colorspace.raw();
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.pixel_format)
    }
}
