//! Conversion between transport buffers and the canonical RGB image.
//!
//! `decode` accepts UYVY, RGBA and BGRA, always yields an RGB image at the
//! model resolution, and refuses buffers whose length disagrees with the
//! declared geometry. `encode` produces tightly packed, fully opaque RGBA.

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use crate::frame::{CanonicalImage, OutputFrame, PixelFormat, VideoFrame};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error(
        "{format} frame length mismatch for {width}x{height}: expected {expected} bytes, got {actual}"
    )]
    FormatMismatch {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Converts frames to and from a fixed model resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCodec {
    width: u32,
    height: u32,
}

impl FrameCodec {
    pub fn new(width: u32, height: u32) -> Result<Self, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decodes a received frame into RGB at the target resolution.
    pub fn decode(&self, frame: &VideoFrame) -> Result<CanonicalImage, CodecError> {
        let rgb = packed_to_rgb(frame.data(), frame.width, frame.height, frame.format)?;
        let image = RgbImage::from_raw(frame.width, frame.height, rgb).ok_or(
            CodecError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            },
        )?;

        if image.dimensions() == (self.width, self.height) {
            return Ok(image);
        }
        Ok(imageops::resize(
            &image,
            self.width,
            self.height,
            FilterType::Triangle,
        ))
    }

    /// Encodes a target-resolution RGB image as an opaque RGBA output frame.
    ///
    /// The image must already be at the codec's resolution.
    pub fn encode(&self, image: &CanonicalImage) -> OutputFrame {
        debug_assert_eq!(
            image.dimensions(),
            (self.width, self.height),
            "encode called with an image at the wrong resolution"
        );
        let (width, height) = image.dimensions();
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for pixel in image.pixels() {
            rgba.extend_from_slice(&[pixel[0], pixel[1], pixel[2], u8::MAX]);
        }
        OutputFrame::new(rgba, width, height)
    }
}

/// Expected byte length of a tightly packed frame.
pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> Result<usize, CodecError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
        .ok_or(CodecError::InvalidDimensions { width, height })
}

fn packed_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CodecError> {
    if width == 0 || height == 0 {
        return Err(CodecError::InvalidDimensions { width, height });
    }
    let expected = expected_len(width, height, format)?;
    if pixels.len() != expected {
        return Err(CodecError::FormatMismatch {
            format,
            width,
            height,
            expected,
            actual: pixels.len(),
        });
    }

    let rgb = match format {
        PixelFormat::Uyvy => uyvy_to_rgb(pixels, width as usize, height as usize),
        PixelFormat::Rgba => pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Bgra => pixels
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
    };
    Ok(rgb)
}

// BT.601 limited range. Each U/V pair is shared by two horizontally adjacent
// pixels; the last column of an odd-width row has no V sample and uses neutral
// chroma.
fn uyvy_to_rgb(pixels: &[u8], w: usize, h: usize) -> Vec<u8> {
    let row_bytes = w * 2;
    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in pixels.chunks_exact(row_bytes).take(h) {
        for x in 0..w {
            let pair = (x & !1) * 2;
            let y = row[x * 2 + 1] as f32;
            let u = row[pair] as f32;
            let v = row.get(pair + 2).copied().unwrap_or(128) as f32;
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    rgb
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let c = 1.164_f32 * (y - 16.0);
    let d = u - 128.0;
    let e = v - 128.0;

    let r = c + 1.596_f32 * e;
    let g = c - 0.391_f32 * d - 0.813_f32 * e;
    let b = c + 2.018_f32 * d;

    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRate;

    fn frame(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> VideoFrame {
        VideoFrame::new(data, width, height, format, FrameRate::NTSC)
    }

    #[test]
    fn uyvy_white_and_black_map_to_full_range() -> Result<(), CodecError> {
        let codec = FrameCodec::new(2, 1)?;
        // U Y0 V Y1: white then black with neutral chroma
        let image = codec.decode(&frame(vec![128, 235, 128, 16], 2, 1, PixelFormat::Uyvy))?;
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn uyvy_odd_width_stays_in_bounds() -> Result<(), CodecError> {
        let codec = FrameCodec::new(3, 1)?;
        let image = codec.decode(&frame(vec![128, 126, 128, 126, 128, 126], 3, 1, PixelFormat::Uyvy))?;
        assert_eq!(image.dimensions(), (3, 1));
        assert_eq!(image.get_pixel(2, 0).0, image.get_pixel(0, 0).0);
        Ok(())
    }

    #[test]
    fn rgba_and_bgra_channel_order() -> Result<(), CodecError> {
        let codec = FrameCodec::new(1, 1)?;
        let rgba = codec.decode(&frame(vec![10, 20, 30, 0], 1, 1, PixelFormat::Rgba))?;
        assert_eq!(rgba.get_pixel(0, 0).0, [10, 20, 30]);
        let bgra = codec.decode(&frame(vec![10, 20, 30, 0], 1, 1, PixelFormat::Bgra))?;
        assert_eq!(bgra.get_pixel(0, 0).0, [30, 20, 10]);
        Ok(())
    }

    #[test]
    fn decode_always_yields_target_resolution() -> Result<(), CodecError> {
        let codec = FrameCodec::new(64, 48)?;
        for (w, h) in [(1, 1), (3, 7), (64, 48), (200, 10), (1, 300)] {
            for format in [PixelFormat::Uyvy, PixelFormat::Rgba, PixelFormat::Bgra] {
                let len = expected_len(w, h, format)?;
                let image = codec.decode(&frame(vec![90u8; len], w, h, format))?;
                assert_eq!(image.dimensions(), (64, 48), "{format} {w}x{h}");
            }
        }
        Ok(())
    }

    #[test]
    fn length_mismatch_is_reported_not_read() {
        let codec = FrameCodec::new(4, 4).unwrap();
        let err = codec
            .decode(&frame(vec![0u8; 10], 4, 4, PixelFormat::Rgba))
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::FormatMismatch {
                format: PixelFormat::Rgba,
                width: 4,
                height: 4,
                expected: 64,
                actual: 10,
            }
        );

        let err = codec
            .decode(&frame(vec![0u8; 33], 4, 4, PixelFormat::Uyvy))
            .unwrap_err();
        assert!(matches!(err, CodecError::FormatMismatch { expected: 32, .. }));
    }

    #[test]
    fn zero_sized_input_is_rejected() {
        let codec = FrameCodec::new(4, 4).unwrap();
        let err = codec
            .decode(&frame(Vec::new(), 0, 4, PixelFormat::Bgra))
            .unwrap_err();
        assert_eq!(err, CodecError::InvalidDimensions { width: 0, height: 4 });
        assert!(FrameCodec::new(0, 512).is_err());
    }

    #[test]
    fn encode_is_opaque_rgba_of_fixed_size() -> Result<(), CodecError> {
        let codec = FrameCodec::new(16, 8)?;
        let decoded = codec.decode(&frame(vec![200u8; 5 * 3 * 2], 5, 3, PixelFormat::Uyvy))?;
        let out = codec.encode(&decoded);
        assert_eq!(out.byte_len(), 16 * 8 * 4);
        assert_eq!(out.line_stride, 64);
        assert!(out.data().chunks_exact(4).all(|px| px[3] == 255));
        Ok(())
    }

    #[test]
    fn encode_keeps_rgb_values() -> Result<(), CodecError> {
        let codec = FrameCodec::new(1, 1)?;
        let image = RgbImage::from_pixel(1, 1, image::Rgb([1, 2, 3]));
        assert_eq!(codec.encode(&image).data(), &[1, 2, 3, 255]);
        Ok(())
    }
}
