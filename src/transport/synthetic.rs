//! Synthetic transport for tests and dry runs.
//!
//! - The finder reports the configured source names.
//! - The receiver produces a moving test pattern. Pixel formats rotate through
//!   UYVY, RGBA, BGRA. Audio frames and timeouts are interleaved on a fixed
//!   schedule so the relay exercises every capture path.
//! - The sender counts frames and discards them.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::{Finder, Receiver, Sender, SourceInfo, Transport};
use crate::config::SyntheticSettings;
use crate::frame::{AudioFrame, Capture, FrameRate, OutputFrame, PixelFormat, VideoFrame};

const FORMATS: [PixelFormat; 3] = [PixelFormat::Uyvy, PixelFormat::Rgba, PixelFormat::Bgra];

pub struct SyntheticTransport {
    settings: SyntheticSettings,
    initialized: bool,
}

impl SyntheticTransport {
    pub fn new(settings: SyntheticSettings) -> Self {
        Self {
            settings,
            initialized: false,
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(anyhow!("synthetic transport used before initialize"));
        }
        Ok(())
    }
}

impl Transport for SyntheticTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn create_finder(&mut self) -> Result<Box<dyn Finder>> {
        self.ensure_initialized()?;
        Ok(Box::new(SyntheticFinder {
            names: self.settings.sources.clone(),
        }))
    }

    fn connect(&mut self, source: &SourceInfo) -> Result<Box<dyn Receiver>> {
        self.ensure_initialized()?;
        if !self.settings.sources.iter().any(|name| name == &source.name) {
            return Err(anyhow!("synthetic source '{}' does not exist", source.name));
        }
        log::info!("SyntheticReceiver: connected to {}", source.name);
        Ok(Box::new(SyntheticReceiver::new(self.settings.clone())))
    }

    fn create_sender(&mut self, name: &str) -> Result<Box<dyn Sender>> {
        self.ensure_initialized()?;
        Ok(Box::new(SyntheticSender {
            name: name.to_string(),
            frames_sent: 0,
        }))
    }

    fn teardown(&mut self) {
        self.initialized = false;
        log::info!("SyntheticTransport: torn down");
    }
}

struct SyntheticFinder {
    names: Vec<String>,
}

impl Finder for SyntheticFinder {
    fn sources(&mut self, _timeout: Duration) -> Result<Vec<SourceInfo>> {
        Ok(self
            .names
            .iter()
            .map(|name| SourceInfo {
                name: name.clone(),
                address: Some(format!("stub://{}", name)),
            })
            .collect())
    }
}

impl Drop for SyntheticFinder {
    fn drop(&mut self) {
        log::info!("SyntheticFinder: released");
    }
}

pub struct SyntheticReceiver {
    settings: SyntheticSettings,
    captures: u64,
    video_frames: u64,
    last_capture: Option<Instant>,
}

impl SyntheticReceiver {
    pub fn new(settings: SyntheticSettings) -> Self {
        Self {
            settings,
            captures: 0,
            video_frames: 0,
            last_capture: None,
        }
    }

    fn pace(&mut self, timeout: Duration) {
        if self.settings.fps > 0 {
            let interval = Duration::from_secs_f64(1.0 / self.settings.fps as f64);
            if let Some(last) = self.last_capture {
                let wait = interval.saturating_sub(last.elapsed()).min(timeout);
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
            }
        }
        self.last_capture = Some(Instant::now());
    }

    fn is_scheduled(every: u32, n: u64) -> bool {
        every > 0 && n % every as u64 == 0
    }

    fn next_video(&mut self) -> VideoFrame {
        let format = FORMATS[(self.video_frames % FORMATS.len() as u64) as usize];
        self.video_frames += 1;
        let data = pattern(
            self.settings.width,
            self.settings.height,
            format,
            self.video_frames,
        );
        VideoFrame::new(
            data,
            self.settings.width,
            self.settings.height,
            format,
            FrameRate::NTSC,
        )
    }
}

impl Receiver for SyntheticReceiver {
    fn capture(&mut self, timeout: Duration) -> Result<Capture> {
        self.pace(timeout);
        self.captures += 1;

        if Self::is_scheduled(self.settings.timeout_every, self.captures) {
            return Ok(Capture::Timeout);
        }
        if Self::is_scheduled(self.settings.audio_every, self.captures) {
            return Ok(Capture::Audio(AudioFrame {
                sample_rate: 48_000,
                channels: 2,
                samples_per_channel: 1_602,
            }));
        }
        Ok(Capture::Video(self.next_video()))
    }

    fn free_video(&mut self, frame: VideoFrame) {
        log::trace!("SyntheticReceiver: freed {} video frame", frame.format);
    }

    fn free_audio(&mut self, frame: AudioFrame) {
        log::trace!(
            "SyntheticReceiver: freed audio frame ({} samples)",
            frame.samples_per_channel
        );
    }
}

impl Drop for SyntheticReceiver {
    fn drop(&mut self) {
        log::info!(
            "SyntheticReceiver: released after {} captures",
            self.captures
        );
    }
}

struct SyntheticSender {
    name: String,
    frames_sent: u64,
}

impl Sender for SyntheticSender {
    fn send_video(&mut self, frame: &OutputFrame) -> Result<()> {
        if frame.byte_len() != frame.line_stride as usize * frame.height as usize {
            return Err(anyhow!(
                "output frame has {} bytes, expected stride {} x {} rows",
                frame.byte_len(),
                frame.line_stride,
                frame.height
            ));
        }
        self.frames_sent += 1;
        log::debug!(
            "SyntheticSender {}: frame #{} ({}x{})",
            self.name,
            self.frames_sent,
            frame.width,
            frame.height
        );
        Ok(())
    }
}

impl Drop for SyntheticSender {
    fn drop(&mut self) {
        log::info!(
            "SyntheticSender {}: released after {} frames",
            self.name,
            self.frames_sent
        );
    }
}

/// Diagonal gradient that shifts by one step per frame.
fn pattern(width: u32, height: u32, format: PixelFormat, frame: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let shift = frame as usize;
    let mut data = Vec::with_capacity(w * h * format.bytes_per_pixel());
    for y in 0..h {
        for x in 0..w {
            let level = ((x + y + shift) % 256) as u8;
            match format {
                PixelFormat::Uyvy => {
                    // Even columns carry U, odd columns carry V.
                    let chroma = if x % 2 == 0 { 128u8.wrapping_add(level / 4) } else { 128 };
                    data.extend_from_slice(&[chroma, level]);
                }
                PixelFormat::Rgba => data.extend_from_slice(&[level, 255 - level, 128, 255]),
                PixelFormat::Bgra => data.extend_from_slice(&[128, 255 - level, level, 255]),
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{expected_len, FrameCodec};

    fn settings() -> SyntheticSettings {
        SyntheticSettings {
            sources: vec!["stub-cam".to_string()],
            width: 6,
            height: 4,
            fps: 0,
            audio_every: 5,
            timeout_every: 7,
        }
    }

    #[test]
    fn capture_schedule_and_formats() -> Result<()> {
        let mut receiver = SyntheticReceiver::new(settings());
        let mut formats = Vec::new();
        let mut audio = 0;
        let mut timeouts = 0;
        for _ in 0..35 {
            match receiver.capture(Duration::from_secs(1))? {
                Capture::Video(frame) => {
                    assert_eq!(
                        frame.byte_len(),
                        expected_len(frame.width, frame.height, frame.format)?
                    );
                    formats.push(frame.format);
                    receiver.free_video(frame);
                }
                Capture::Audio(frame) => {
                    audio += 1;
                    receiver.free_audio(frame);
                }
                Capture::Timeout => timeouts += 1,
            }
        }
        // 35 is a multiple of both; the timeout wins.
        assert_eq!(timeouts, 5);
        assert_eq!(audio, 6);
        assert_eq!(formats.len(), 24);
        assert_eq!(&formats[..3], &FORMATS);
        Ok(())
    }

    #[test]
    fn synthetic_frames_decode() -> Result<()> {
        let codec = FrameCodec::new(8, 8)?;
        let mut receiver = SyntheticReceiver::new(SyntheticSettings {
            audio_every: 0,
            timeout_every: 0,
            ..settings()
        });
        for _ in 0..3 {
            if let Capture::Video(frame) = receiver.capture(Duration::ZERO)? {
                assert_eq!(codec.decode(&frame)?.dimensions(), (8, 8));
            }
        }
        Ok(())
    }

    #[test]
    fn transport_requires_initialize_and_known_source() -> Result<()> {
        let mut transport = SyntheticTransport::new(settings());
        assert!(transport.create_finder().is_err());
        transport.initialize()?;

        let sources = transport.create_finder()?.sources(Duration::ZERO)?;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].address.as_deref(), Some("stub://stub-cam"));

        assert!(transport.connect(&sources[0]).is_ok());
        assert!(transport.connect(&SourceInfo::new("other")).is_err());
        transport.teardown();
        assert!(transport.create_sender("out").is_err());
        Ok(())
    }
}
