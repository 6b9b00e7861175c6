//! Frame validation utilities for test pattern verification.
//!
//! These functions check that captured bytes contain expected test
//! patterns. Useful for integration testing with virtual cameras (vivid)
//! and for exercising the capture path against the mock control channel.

use thiserror::Error;

use crate::decode::yuv_to_rgb;
use crate::format::{FrameFormat, PixelFormat};
use crate::frame::Frame;

/// A frame failed a pattern check.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(String);

/// Result type for validation checks.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values resulting from converting the YUV values used
/// by the color bar test pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion
/// errors).
const COLOR_TOLERANCE: u32 = 15;

/// RGB value of the pixel at `(x, y)` in a raw frame.
///
/// Supports the formats the pattern checks run against: YUYV (chroma shared
/// per pixel pair) and packed RGB24. Returns `None` for other formats or
/// out-of-range coordinates.
#[must_use]
pub fn pixel_at(data: &[u8], format: &FrameFormat, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    if x >= format.width || y >= format.height {
        return None;
    }
    match format.pixel_format {
        PixelFormat::Yuyv => {
            let stride = format.stride.max(format.width * 2) as usize;
            // Round down to the even x of the [Y0 U Y1 V] group.
            let pair_x = (x & !1) as usize;
            let offset = y as usize * stride + pair_x * 2;
            let group = data.get(offset..offset + 4)?;
            let y_val = if x % 2 == 0 { group[0] } else { group[2] };
            Some(yuv_to_rgb(y_val, group[1], group[3]))
        }
        PixelFormat::Rgb24 => {
            let stride = format.stride.max(format.width * 3) as usize;
            let offset = y as usize * stride + x as usize * 3;
            let pixel = data.get(offset..offset + 3)?;
            Some((pixel[0], pixel[1], pixel[2]))
        }
        _ => None,
    }
}

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// Checks 8 vertical stripes at their center positions, with a tolerance
/// for YUV-to-RGB conversion inaccuracies.
pub fn validate_color_bars(data: &[u8], format: &FrameFormat) -> Result<()> {
    let bar_width = format.width / 8;
    let center_y = format.height / 2;

    for (bar_idx, expected_rgb) in SMPTE_COLOR_BARS.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        let actual_rgb = pixel_at(data, format, sample_x, center_y).ok_or_else(|| {
            ValidationError(format!("failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(ValidationError(format!(
                "color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples a horizontal line at the center of the frame and verifies that
/// luminance increases monotonically from left to right, with a significant
/// overall change (not a solid color).
pub fn validate_gradient(data: &[u8], format: &FrameFormat) -> Result<()> {
    let center_y = format.height / 2;
    let sample_step = 10u32;

    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;
    let mut last_luminance: Option<f32> = None;

    for x in (0..format.width).step_by(sample_step as usize) {
        let (r, g, b) = pixel_at(data, format, x, center_y).ok_or_else(|| {
            ValidationError(format!("failed to get pixel at ({x}, {center_y})"))
        })?;

        // Luminance (Y' in Rec. 601).
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if first_luminance.is_none() {
            first_luminance = Some(luminance);
        }

        if let Some(prev) = prev_luminance {
            // Allow small decreases due to rounding.
            if luminance < prev - 1.0 {
                return Err(ValidationError(format!(
                    "gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        prev_luminance = Some(luminance);
        last_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, last_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(ValidationError(format!(
                "insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that a sequence of frames has incrementing sequence numbers
/// with no gaps.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(ValidationError(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for window in frames.windows(2) {
        let prev_seq = window[0].sequence();
        let curr_seq = window[1].sequence();
        if curr_seq != prev_seq + 1 {
            return Err(ValidationError(format!(
                "frame sequence gap: expected {}, got {curr_seq}",
                prev_seq + 1
            )));
        }
    }

    Ok(())
}

/// Whether two RGB colors match within a per-channel tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar).abs_diff(u32::from(er)) <= tolerance
        && u32::from(ag).abs_diff(u32::from(eg)) <= tolerance
        && u32::from(ab).abs_diff(u32::from(eb)) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Colorspace;
    use crate::mock::{generate_test_frame, TestPattern};

    fn yuyv_format() -> FrameFormat {
        FrameFormat::new(640, 480, PixelFormat::Yuyv, Colorspace::Raw)
    }

    #[test]
    fn color_bars_validate_against_their_own_pattern() {
        let format = yuyv_format();
        let data = generate_test_frame(&format, TestPattern::ColorBars);
        let result = validate_color_bars(&data, &format);
        assert!(result.is_ok(), "color bars should validate: {result:?}");
    }

    #[test]
    fn color_bars_reject_a_gradient() {
        let format = yuyv_format();
        let data = generate_test_frame(&format, TestPattern::Gradient);
        assert!(validate_color_bars(&data, &format).is_err());
    }

    #[test]
    fn gradient_validates_against_its_own_pattern() {
        let format = yuyv_format();
        let data = generate_test_frame(&format, TestPattern::Gradient);
        let result = validate_gradient(&data, &format);
        assert!(result.is_ok(), "gradient should validate: {result:?}");
    }

    #[test]
    fn gradient_rejects_a_solid_color() {
        let format = yuyv_format();
        let data = generate_test_frame(&format, TestPattern::Solid(128, 128, 128));
        assert!(validate_gradient(&data, &format).is_err());
    }

    #[test]
    fn pixel_at_reads_rgb24_directly() {
        let format = FrameFormat::new(2, 1, PixelFormat::Rgb24, Colorspace::Srgb);
        let data = [10, 20, 30, 40, 50, 60];
        assert_eq!(pixel_at(&data, &format, 1, 0), Some((40, 50, 60)));
        assert_eq!(pixel_at(&data, &format, 2, 0), None);
    }

    #[test]
    fn pixel_at_rejects_undecodable_formats() {
        let format = FrameFormat::new(2, 1, PixelFormat::H264, Colorspace::Default);
        assert_eq!(pixel_at(&[0u8; 16], &format, 0, 0), None);
    }

    #[test]
    fn frame_sequences_must_be_gapless() {
        let frames: Vec<Frame> = Vec::new();
        assert!(validate_frame_sequence(&frames).is_err());

        let make = |sequence| {
            Frame::new(&crate::control::Dequeued {
                index: 0,
                bytes_used: 1,
                sequence,
                timestamp: std::time::Duration::ZERO,
            })
        };
        let contiguous = [make(4), make(5), make(6)];
        assert!(validate_frame_sequence(&contiguous).is_ok());

        let gapped = [make(4), make(6)];
        assert!(validate_frame_sequence(&gapped).is_err());
    }
}
