//! Raw V4L2 ABI: `videodev2.h` structures and `VIDIOC_*` control requests.
//!
//! Layouts are bit-exact for the 64-bit Linux ABI. The unions in
//! `v4l2_format` and `v4l2_buffer` carry kernel pointers in variants this
//! crate never uses, which forces 8-byte alignment; the padding members
//! below reproduce that.

#![allow(non_camel_case_types)]
#![allow(clippy::struct_field_names)]

use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_VIDEO_OVERLAY: u32 = 0x0000_0004;
pub const V4L2_CAP_VIDEO_M2M: u32 = 0x0000_8000;
pub const V4L2_CAP_EXT_PIX_FORMAT: u32 = 0x0020_0000;
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;
pub const V4L2_CAP_ASYNCIO: u32 = 0x0200_0000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_MMAP: u32 = 1;

pub const V4L2_COLORSPACE_DEFAULT: u32 = 0;
pub const V4L2_COLORSPACE_JPEG: u32 = 7;
pub const V4L2_COLORSPACE_SRGB: u32 = 8;
pub const V4L2_COLORSPACE_ADOBERGB: u32 = 9;
pub const V4L2_COLORSPACE_RAW: u32 = 11;

/// Encode a four-character pixel format code the way `v4l2_fourcc()` does.
pub const fn fourcc(code: [u8; 4]) -> u32 {
    u32::from_le_bytes(code)
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    // The kernel union also holds window/vbi/meta variants, the largest of
    // which is the 200-byte raw_data escape hatch; v4l2_window contains
    // pointers, hence the u64 padding for alignment.
    pub raw: [u8; 200],
    pub(crate) _align: [u64; 25],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

impl v4l2_format {
    pub fn zeroed() -> Self {
        // SAFETY: all-zero bytes are a valid value for every field.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

impl v4l2_requestbuffers {
    pub fn zeroed() -> Self {
        // SAFETY: all-zero bytes are a valid value for every field.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: libc::c_ulong,
    pub planes: *mut libc::c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: u32,
}

impl v4l2_buffer {
    pub fn zeroed() -> Self {
        // SAFETY: all-zero bytes are a valid value for every field; the
        // pointer variant of `m` is allowed to be null.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_cropcap {
    pub type_: u32,
    pub bounds: v4l2_rect,
    pub defrect: v4l2_rect,
    pub pixelaspect: v4l2_fract,
}

impl v4l2_cropcap {
    pub fn zeroed() -> Self {
        // SAFETY: all-zero bytes are a valid value for every field.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_crop {
    pub type_: u32,
    pub c: v4l2_rect,
}

impl v4l2_crop {
    pub fn zeroed() -> Self {
        // SAFETY: all-zero bytes are a valid value for every field.
        unsafe { std::mem::zeroed() }
    }
}

// Control request numbers from videodev2.h; the macros derive the full
// request codes from direction, 'V', the number, and the argument size.
ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
ioctl_write_ptr!(vidioc_streamon, b'V', 18, libc::c_int);
ioctl_write_ptr!(vidioc_streamoff, b'V', 19, libc::c_int);
ioctl_readwrite!(vidioc_cropcap, b'V', 58, v4l2_cropcap);
ioctl_readwrite!(vidioc_g_crop, b'V', 59, v4l2_crop);
ioctl_write_ptr!(vidioc_s_crop, b'V', 60, v4l2_crop);
