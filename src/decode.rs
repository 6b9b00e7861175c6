//! Decode captured bytes into display-ready RGB24.
//!
//! The presentation layer can also take the raw bytes plus
//! [`FrameFormat`] and decode on its own; this module covers the common
//! cases so it does not have to.

use std::io::Cursor;

use jpeg_decoder::Decoder;
use thiserror::Error;

use crate::format::{FrameFormat, PixelFormat};

/// A decoded frame: tightly packed RGB24 pixels.
#[derive(Debug, Clone)]
pub struct RgbImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// `width * height * 3` bytes, row-major RGB.
    pub pixels: Vec<u8>,
}

/// Error type for frame decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No decoder for this pixel format; read the raw bytes instead.
    #[error("no decoder for pixel format {0}")]
    Unsupported(PixelFormat),

    /// The frame carried fewer bytes than its format requires.
    #[error("frame data truncated: have {have} bytes, need {need}")]
    Truncated {
        /// Bytes actually present.
        have: usize,
        /// Bytes the format requires.
        need: usize,
    },

    /// The compressed payload could not be decoded.
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),
}

/// Decode one captured frame into packed RGB24.
pub fn decode(format: &FrameFormat, data: &[u8]) -> Result<RgbImage, DecodeError> {
    match format.pixel_format {
        PixelFormat::Rgb24 => decode_packed(format, data, 3, |pixel, out| {
            out.extend_from_slice(pixel);
        }),
        PixelFormat::Bgr24 => decode_packed(format, data, 3, |pixel, out| {
            out.extend([pixel[2], pixel[1], pixel[0]]);
        }),
        PixelFormat::Grey => decode_packed(format, data, 1, |pixel, out| {
            out.extend([pixel[0], pixel[0], pixel[0]]);
        }),
        PixelFormat::Yuyv => decode_yuyv(format, data),
        PixelFormat::Mjpeg | PixelFormat::Jpeg => decode_jpeg(data),
        other => Err(DecodeError::Unsupported(other)),
    }
}

/// Rows of a packed raw frame, honoring a driver stride wider than the
/// pixel data.
fn rows<'a>(
    format: &FrameFormat,
    data: &'a [u8],
    bytes_per_pixel: usize,
) -> Result<impl Iterator<Item = &'a [u8]>, DecodeError> {
    let width = format.width as usize;
    let height = format.height as usize;
    let row_bytes = width * bytes_per_pixel;
    let stride = (format.stride as usize).max(row_bytes);

    let need = if height == 0 {
        0
    } else {
        stride * (height - 1) + row_bytes
    };
    if data.len() < need {
        return Err(DecodeError::Truncated {
            have: data.len(),
            need,
        });
    }

    Ok((0..height).filter_map(move |row| data.get(row * stride..row * stride + row_bytes)))
}

fn decode_packed<F>(
    format: &FrameFormat,
    data: &[u8],
    bytes_per_pixel: usize,
    mut emit: F,
) -> Result<RgbImage, DecodeError>
where
    F: FnMut(&[u8], &mut Vec<u8>),
{
    let mut pixels = Vec::with_capacity(format.width as usize * format.height as usize * 3);
    for row in rows(format, data, bytes_per_pixel)? {
        for pixel in row.chunks_exact(bytes_per_pixel) {
            emit(pixel, &mut pixels);
        }
    }
    Ok(RgbImage {
        width: format.width,
        height: format.height,
        pixels,
    })
}

fn decode_yuyv(format: &FrameFormat, data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut pixels = Vec::with_capacity(format.width as usize * format.height as usize * 3);
    for row in rows(format, data, 2)? {
        // [Y0 U Y1 V] carries two pixels sharing chroma.
        for group in row.chunks_exact(4) {
            let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
            let (r, g, b) = yuv_to_rgb(y0, u, v);
            pixels.extend([r, g, b]);
            let (r, g, b) = yuv_to_rgb(y1, u, v);
            pixels.extend([r, g, b]);
        }
    }
    Ok(RgbImage {
        width: format.width,
        height: format.height,
        pixels,
    })
}

fn decode_jpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = Decoder::new(Cursor::new(data));
    let pixels = decoder
        .decode()
        .map_err(|err| DecodeError::Jpeg(err.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Jpeg("missing image info".to_owned()))?;

    let pixels = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => pixels,
        jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => {
            return Err(DecodeError::Jpeg(format!(
                "unsupported jpeg pixel format {other:?}"
            )))
        }
    };

    Ok(RgbImage {
        width: u32::from(info.width),
        height: u32::from(info.height),
        pixels,
    })
}

/// Convert YUV values to RGB using the ITU-R BT.601 formula, clamped to the
/// 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        if val < 0.0 {
            0
        } else if val > 255.0 {
            255
        } else {
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            {
                val as u8
            }
        }
    };

    (clamp(r), clamp(g), clamp(b))
}
