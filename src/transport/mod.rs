//! Network video transport seam.
//!
//! This module provides the handles the relay needs from a streaming SDK:
//! - `Transport`: global init/teardown and handle factories
//! - `Finder`: source discovery
//! - `Receiver`: blocking capture with timeout, explicit frame release
//! - `Sender`: publishes output frames under a name
//!
//! Implementations:
//! - `stub`: synthetic transport (testing, dry runs)
//! - `ndi`: NDI through the GStreamer NDI plugin (feature: transport-ndi)
//!
//! Handle lifetimes are owned by `Session`, which releases them in a fixed
//! order on every exit path.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::TransportSettings;
use crate::frame::{AudioFrame, Capture, OutputFrame, VideoFrame};

#[cfg(feature = "transport-ndi")]
pub mod ndi;
mod session;
pub mod synthetic;

pub use session::Session;
pub use synthetic::SyntheticTransport;

/// A discovered source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    /// Human-readable name, e.g. `STUDIO-PC (OBS)`.
    pub name: String,
    /// Transport-specific address, when known.
    pub address: Option<String>,
}

impl SourceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Global transport library handle.
pub trait Transport {
    fn name(&self) -> &'static str;

    /// Global library init. Called once before any other handle is created.
    fn initialize(&mut self) -> Result<()>;

    fn create_finder(&mut self) -> Result<Box<dyn Finder>>;

    fn connect(&mut self, source: &SourceInfo) -> Result<Box<dyn Receiver>>;

    fn create_sender(&mut self, name: &str) -> Result<Box<dyn Sender>>;

    /// Global library teardown. Called once, after every handle is released.
    fn teardown(&mut self);
}

/// Discovery handle. Dropping it releases the finder.
pub trait Finder {
    /// Waits up to `timeout` for sources to announce themselves.
    fn sources(&mut self, timeout: Duration) -> Result<Vec<SourceInfo>>;
}

/// Receive handle. Dropping it releases the receiver.
pub trait Receiver {
    /// Blocks for at most `timeout` waiting for the next frame.
    fn capture(&mut self, timeout: Duration) -> Result<Capture>;

    /// Hands a video buffer back to the transport pool.
    fn free_video(&mut self, frame: VideoFrame);

    /// Hands an audio buffer back to the transport pool.
    fn free_audio(&mut self, frame: AudioFrame);
}

/// Send handle. Dropping it releases the sender.
pub trait Sender {
    fn send_video(&mut self, frame: &OutputFrame) -> Result<()>;
}

/// Scoped ownership of a received video frame.
///
/// The frame goes back to the receiver when the guard drops, including when an
/// error unwinds the iteration that acquired it.
pub struct FrameGuard<'a> {
    receiver: &'a mut dyn Receiver,
    frame: Option<VideoFrame>,
}

impl<'a> FrameGuard<'a> {
    pub fn new(receiver: &'a mut dyn Receiver, frame: VideoFrame) -> Self {
        Self {
            receiver,
            frame: Some(frame),
        }
    }
}

impl Deref for FrameGuard<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        match &self.frame {
            Some(frame) => frame,
            // `frame` is only taken in `drop`.
            None => unreachable!("frame guard accessed after release"),
        }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.receiver.free_video(frame);
        }
    }
}

/// Which transport implementation to open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Stub,
    Ndi,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stub => "stub",
            TransportKind::Ndi => "ndi",
        }
    }
}

impl Default for TransportKind {
    fn default() -> Self {
        if cfg!(feature = "transport-ndi") {
            TransportKind::Ndi
        } else {
            TransportKind::Stub
        }
    }
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" | "synthetic" => Ok(TransportKind::Stub),
            "ndi" => Ok(TransportKind::Ndi),
            other => Err(anyhow!(
                "unknown transport '{}'; expected 'stub' or 'ndi'",
                other
            )),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the transport selected in settings.
pub fn open(settings: &TransportSettings) -> Result<Box<dyn Transport>> {
    match settings.kind {
        TransportKind::Stub => Ok(Box::new(SyntheticTransport::new(settings.synthetic.clone()))),
        TransportKind::Ndi => {
            #[cfg(feature = "transport-ndi")]
            {
                Ok(Box::new(ndi::NdiTransport::new()))
            }
            #[cfg(not(feature = "transport-ndi"))]
            {
                anyhow::bail!("NDI transport requires the transport-ndi feature")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameRate, PixelFormat};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct CountingReceiver {
        freed: Rc<RefCell<Vec<u32>>>,
    }

    impl Receiver for CountingReceiver {
        fn capture(&mut self, _timeout: Duration) -> Result<Capture> {
            Ok(Capture::Timeout)
        }

        fn free_video(&mut self, frame: VideoFrame) {
            self.freed.borrow_mut().push(frame.width);
        }

        fn free_audio(&mut self, _frame: AudioFrame) {}
    }

    fn frame(width: u32) -> VideoFrame {
        VideoFrame::new(vec![0; width as usize * 4], width, 1, PixelFormat::Bgra, FrameRate::NTSC)
    }

    #[test]
    fn guard_releases_on_drop_and_on_error() {
        let freed = Rc::new(RefCell::new(Vec::new()));
        let mut receiver = CountingReceiver {
            freed: freed.clone(),
        };

        {
            let guard = FrameGuard::new(&mut receiver, frame(3));
            assert_eq!(guard.width, 3);
        }

        let failing = |receiver: &mut CountingReceiver| -> Result<()> {
            let guard = FrameGuard::new(receiver, frame(5));
            if guard.width == 5 {
                return Err(anyhow!("decode failed"));
            }
            Ok(())
        };
        assert!(failing(&mut receiver).is_err());

        assert_eq!(*freed.borrow(), vec![3, 5]);
    }

    #[test]
    fn transport_kind_parses() -> Result<()> {
        assert_eq!("stub".parse::<TransportKind>()?, TransportKind::Stub);
        assert_eq!(" NDI ".parse::<TransportKind>()?, TransportKind::Ndi);
        assert!("rtsp".parse::<TransportKind>().is_err());
        Ok(())
    }
}
