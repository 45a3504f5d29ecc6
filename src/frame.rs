//! Frame types exchanged with the transport.
//!
//! - `VideoFrame`: packed pixels received from a source. Owned by the transport's
//!   buffer pool; hand it back with `Receiver::free_video` (see `FrameGuard`).
//! - `AudioFrame`: received audio. Never forwarded, only released.
//! - `OutputFrame`: packed RGBA ready for `Sender::send_video`.
//! - `Capture`: what a single receive call yields.

use std::fmt;

use image::RgbImage;

/// In-memory interleaved RGB grid handed between codec and backend.
pub type CanonicalImage = RgbImage;

/// Pixel layouts a receiver can deliver.
///
/// Anything the transport tags with an unknown FourCC is treated as BGRA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2, byte order U0 Y0 V0 Y1.
    Uyvy,
    /// 32-bit R G B A.
    Rgba,
    /// 32-bit B G R A.
    Bgra,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Uyvy => 2,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Uyvy => *b"UYVY",
            PixelFormat::Rgba => *b"RGBA",
            PixelFormat::Bgra => *b"BGRA",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&code))
    }
}

/// Frame rate as a rational number of frames per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    /// 29.97 fps, the nominal rate stamped on every output frame.
    pub const NTSC: FrameRate = FrameRate {
        numerator: 30_000,
        denominator: 1_001,
    };

    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn as_f64(self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::NTSC
    }
}

/// Packed video frame as delivered by a receiver.
///
/// Rows are tightly packed: transports with padded strides compact the rows
/// before constructing the frame.
pub struct VideoFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_rate: FrameRate,
}

impl VideoFrame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        frame_rate: FrameRate,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            frame_rate,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("frame_rate", &self.frame_rate)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Received audio. Only its shape is kept; the relay never forwards audio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u32,
    pub samples_per_channel: u32,
}

/// Packed RGBA frame ready to send.
pub struct OutputFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_rate: FrameRate,
    pub line_stride: u32,
}

impl OutputFrame {
    pub(crate) fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgba,
            frame_rate: FrameRate::NTSC,
            line_stride: width * 4,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for OutputFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("line_stride", &self.line_stride)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Result of one blocking receive.
#[derive(Debug)]
pub enum Capture {
    Video(VideoFrame),
    Audio(AudioFrame),
    /// Nothing arrived before the receive timeout elapsed.
    Timeout,
}
