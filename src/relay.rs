//! The receive → decode → infer → encode → send loop.
//!
//! One frame is in flight at a time. The loop borrows its transport handles and
//! backend, so releasing them stays with whoever owns them (`Session`), and it
//! happens whether `run` returns `Ok` or `Err`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::codec::FrameCodec;
use crate::frame::Capture;
use crate::inference::DiffusionBackend;
use crate::stats::{Stats, StatsSample, Summary};
use crate::transport::{FrameGuard, Receiver, Sender};

/// Upper bound on one blocking receive, and so on shutdown latency.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

pub type RelayReport = Summary;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    WaitingForFrame,
    Decoding,
    Inferring,
    Encoding,
    Sending,
    DiscardingAudio,
    Shutdown,
}

/// What a single `step` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Idle,
    AudioDropped,
    FrameRelayed,
}

/// Hooks for user-facing output.
pub trait RelayObserver {
    /// First video frame arrived; `width`x`height` is the input resolution.
    fn session_started(&mut self, _width: u32, _height: u32) {}

    fn stats_sampled(&mut self, _sample: &StatsSample) {}
}

pub struct NoopObserver;

impl RelayObserver for NoopObserver {}

pub struct StreamLoop<'a> {
    receiver: &'a mut dyn Receiver,
    sender: &'a mut dyn Sender,
    backend: &'a mut dyn DiffusionBackend,
    codec: FrameCodec,
    prompt: String,
    shutdown: Arc<AtomicBool>,
    stats: Stats,
    state: LoopState,
    input_resolution: Option<(u32, u32)>,
    receive_timeout: Duration,
}

impl<'a> StreamLoop<'a> {
    pub fn new(
        receiver: &'a mut dyn Receiver,
        sender: &'a mut dyn Sender,
        backend: &'a mut dyn DiffusionBackend,
        codec: FrameCodec,
        prompt: impl Into<String>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            receiver,
            sender,
            backend,
            codec,
            prompt: prompt.into(),
            shutdown,
            stats: Stats::new(),
            state: LoopState::WaitingForFrame,
            input_resolution: None,
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Resolution of the first received video frame.
    pub fn input_resolution(&self) -> Option<(u32, u32)> {
        self.input_resolution
    }

    /// Steps until the shutdown flag is raised or a step fails.
    ///
    /// The flag is checked between iterations; a frame already in flight is
    /// finished first.
    pub fn run(&mut self, observer: &mut dyn RelayObserver) -> Result<()> {
        let result = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(err) = self.step(observer) {
                break Err(err);
            }
        };
        self.state = LoopState::Shutdown;
        result
    }

    /// One receive and whatever it leads to.
    pub fn step(&mut self, observer: &mut dyn RelayObserver) -> Result<StepOutcome> {
        self.state = LoopState::WaitingForFrame;
        let capture = self
            .receiver
            .capture(self.receive_timeout)
            .context("receive failed")?;

        let outcome = match capture {
            Capture::Timeout => StepOutcome::Idle,
            Capture::Audio(frame) => {
                self.state = LoopState::DiscardingAudio;
                log::trace!(
                    "dropping audio frame ({} ch, {} samples)",
                    frame.channels,
                    frame.samples_per_channel
                );
                self.receiver.free_audio(frame);
                StepOutcome::AudioDropped
            }
            Capture::Video(frame) => {
                let received = frame.byte_len();
                let guard = FrameGuard::new(&mut *self.receiver, frame);

                if self.input_resolution.is_none() {
                    self.input_resolution = Some((guard.width, guard.height));
                    observer.session_started(guard.width, guard.height);
                }

                self.state = LoopState::Decoding;
                let image = self.codec.decode(&guard)?;

                self.state = LoopState::Inferring;
                let transformed = self
                    .backend
                    .transform(&image, &self.prompt)
                    .with_context(|| format!("{} backend failed", self.backend.name()))?;
                let expected = (self.codec.width(), self.codec.height());
                if transformed.dimensions() != expected {
                    return Err(anyhow!(
                        "{} backend returned {}x{}, expected {}x{}",
                        self.backend.name(),
                        transformed.width(),
                        transformed.height(),
                        expected.0,
                        expected.1
                    ));
                }

                self.state = LoopState::Encoding;
                let output = self.codec.encode(&transformed);

                self.state = LoopState::Sending;
                self.sender.send_video(&output).context("send failed")?;
                drop(guard);

                self.stats.record_received(received);
                self.stats.record_sent(output.byte_len());
                self.stats.record_frame();
                log::debug!(
                    "frame #{} relayed ({} B in, {} B out)",
                    self.stats.frames(),
                    received,
                    output.byte_len()
                );
                StepOutcome::FrameRelayed
            }
        };

        self.state = LoopState::WaitingForFrame;
        if let Some(sample) = self.stats.sample() {
            observer.stats_sampled(&sample);
        }
        Ok(outcome)
    }

    pub fn report(&self) -> RelayReport {
        self.stats.summary()
    }
}
