use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use diffusion_relay::{
    Acceleration, AudioFrame, CanonicalImage, Capture, CodecError, DiffusionBackend,
    DiffusionSettings, Finder, FrameCodec, FrameRate, NoopObserver, OutputFrame, PixelFormat,
    PromptSettings, Receiver, RelayObserver, Sender, Session, SourceInfo, StatsSample, StreamLoop,
    Transport, VideoFrame,
};

const SIZE: u32 = 8;

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    captures: usize,
    freed_video: usize,
    freed_audio: usize,
    sent: Vec<usize>,
}

type Shared = Rc<RefCell<Recorder>>;

struct MockTransport {
    shared: Shared,
    script: Option<Vec<Capture>>,
    shutdown: Arc<AtomicBool>,
}

struct MockFinder(Shared);

struct MockReceiver {
    shared: Shared,
    script: VecDeque<Capture>,
    shutdown: Arc<AtomicBool>,
}

struct MockSender(Shared);

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&mut self) -> Result<()> {
        self.shared.borrow_mut().events.push("initialize".into());
        Ok(())
    }

    fn create_finder(&mut self) -> Result<Box<dyn Finder>> {
        Ok(Box::new(MockFinder(self.shared.clone())))
    }

    fn connect(&mut self, _source: &SourceInfo) -> Result<Box<dyn Receiver>> {
        Ok(Box::new(MockReceiver {
            shared: self.shared.clone(),
            script: self.script.take().unwrap_or_default().into(),
            shutdown: self.shutdown.clone(),
        }))
    }

    fn create_sender(&mut self, _name: &str) -> Result<Box<dyn Sender>> {
        Ok(Box::new(MockSender(self.shared.clone())))
    }

    fn teardown(&mut self) {
        self.shared.borrow_mut().events.push("teardown".into());
    }
}

impl Finder for MockFinder {
    fn sources(&mut self, _timeout: Duration) -> Result<Vec<SourceInfo>> {
        Ok(vec![SourceInfo::new("MOCK (Camera)")])
    }
}

impl Drop for MockFinder {
    fn drop(&mut self) {
        self.0.borrow_mut().events.push("finder".into());
    }
}

impl Receiver for MockReceiver {
    fn capture(&mut self, _timeout: Duration) -> Result<Capture> {
        self.shared.borrow_mut().captures += 1;
        match self.script.pop_front() {
            Some(capture) => Ok(capture),
            None => {
                // Script exhausted: behave like Ctrl-C during an idle receive.
                self.shutdown.store(true, Ordering::SeqCst);
                Ok(Capture::Timeout)
            }
        }
    }

    fn free_video(&mut self, _frame: VideoFrame) {
        self.shared.borrow_mut().freed_video += 1;
    }

    fn free_audio(&mut self, _frame: AudioFrame) {
        self.shared.borrow_mut().freed_audio += 1;
    }
}

impl Drop for MockReceiver {
    fn drop(&mut self) {
        self.shared.borrow_mut().events.push("receiver".into());
    }
}

impl Sender for MockSender {
    fn send_video(&mut self, frame: &OutputFrame) -> Result<()> {
        self.0.borrow_mut().sent.push(frame.byte_len());
        Ok(())
    }
}

impl Drop for MockSender {
    fn drop(&mut self) {
        self.0.borrow_mut().events.push("sender".into());
    }
}

/// Inverts every pixel; optionally fails or raises the shutdown flag on a
/// given call.
struct Invert {
    calls: usize,
    fail_on: Option<usize>,
    interrupt_on: Option<(usize, Arc<AtomicBool>)>,
}

impl Invert {
    fn new() -> Self {
        Self {
            calls: 0,
            fail_on: None,
            interrupt_on: None,
        }
    }
}

impl DiffusionBackend for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn supports(&self, _acceleration: Acceleration) -> bool {
        true
    }

    fn prepare(&mut self, _settings: &DiffusionSettings, _prompt: &PromptSettings) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, image: &CanonicalImage, _prompt: &str) -> Result<CanonicalImage> {
        self.calls += 1;
        if let Some((call, flag)) = &self.interrupt_on {
            if *call == self.calls {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.fail_on == Some(self.calls) {
            return Err(anyhow!("CUDA out of memory"));
        }
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                *channel = 255 - *channel;
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
struct Watch {
    started: Vec<(u32, u32)>,
    samples: Vec<StatsSample>,
}

impl RelayObserver for Watch {
    fn session_started(&mut self, width: u32, height: u32) {
        self.started.push((width, height));
    }

    fn stats_sampled(&mut self, sample: &StatsSample) {
        self.samples.push(sample.clone());
    }
}

fn video(width: u32, height: u32, format: PixelFormat) -> Capture {
    let len = (width * height) as usize * format.bytes_per_pixel();
    Capture::Video(VideoFrame::new(
        vec![90; len],
        width,
        height,
        format,
        FrameRate::NTSC,
    ))
}

fn audio() -> Capture {
    Capture::Audio(AudioFrame {
        sample_rate: 48_000,
        channels: 2,
        samples_per_channel: 1_600,
    })
}

struct Harness {
    shared: Shared,
    shutdown: Arc<AtomicBool>,
    session: Session,
}

fn harness(script: Vec<Capture>) -> Result<Harness> {
    let shared: Shared = Rc::default();
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut session = Session::start(Box::new(MockTransport {
        shared: shared.clone(),
        script: Some(script),
        shutdown: shutdown.clone(),
    }))?;
    let sources = session.discover(Duration::ZERO)?;
    session.connect(&sources[0])?;
    session.create_sender("relay-test")?;
    Ok(Harness {
        shared,
        shutdown,
        session,
    })
}

fn relay(
    harness: &mut Harness,
    backend: &mut dyn DiffusionBackend,
    observer: &mut dyn RelayObserver,
) -> Result<(Result<()>, u64)> {
    let (receiver, sender) = harness.session.streams()?;
    let mut relay = StreamLoop::new(
        receiver,
        sender,
        backend,
        FrameCodec::new(SIZE, SIZE)?,
        "test prompt",
        harness.shutdown.clone(),
    )
    .with_receive_timeout(Duration::ZERO);
    let outcome = relay.run(observer);
    Ok((outcome, relay.report().frames))
}

fn release_order(shared: &Shared) -> Vec<String> {
    shared
        .borrow()
        .events
        .iter()
        .filter(|event| event.as_str() != "initialize")
        .cloned()
        .collect()
}

const RELEASE_ORDER: [&str; 4] = ["receiver", "sender", "finder", "teardown"];

#[test]
fn counters_track_relayed_frames() -> Result<()> {
    let mut h = harness(vec![
        video(16, 9, PixelFormat::Uyvy),
        audio(),
        video(4, 4, PixelFormat::Rgba),
        Capture::Timeout,
        video(3, 5, PixelFormat::Bgra),
    ])?;
    let mut backend = Invert::new();
    let mut watch = Watch::default();

    let (outcome, frames) = relay(&mut h, &mut backend, &mut watch)?;
    outcome?;

    assert_eq!(frames, 3);
    assert_eq!(backend.calls, 3);
    assert_eq!(watch.started, vec![(16, 9)]);
    assert!(watch.samples.iter().all(|sample| sample.frames <= frames));

    let out_len = (SIZE * SIZE * 4) as usize;
    let rec = h.shared.borrow();
    assert_eq!(rec.sent, vec![out_len; 3]);
    assert_eq!(rec.freed_video, 3);
    assert_eq!(rec.freed_audio, 1);
    Ok(())
}

#[test]
fn audio_never_reaches_backend() -> Result<()> {
    let mut h = harness(vec![audio(), audio(), audio()])?;
    let mut backend = Invert::new();
    let mut watch = Watch::default();

    let (outcome, frames) = relay(&mut h, &mut backend, &mut watch)?;
    outcome?;

    assert_eq!(frames, 0);
    assert_eq!(backend.calls, 0);
    assert!(watch.started.is_empty());
    let rec = h.shared.borrow();
    assert_eq!(rec.freed_audio, 3);
    assert!(rec.sent.is_empty());
    Ok(())
}

#[test]
fn timeouts_change_nothing() -> Result<()> {
    let mut h = harness((0..4).map(|_| Capture::Timeout).collect())?;
    let mut backend = Invert::new();

    let (outcome, frames) = relay(&mut h, &mut backend, &mut NoopObserver)?;
    outcome?;

    assert_eq!(frames, 0);
    assert_eq!(backend.calls, 0);
    // Four scripted timeouts plus the one that raised the flag.
    assert_eq!(h.shared.borrow().captures, 5);
    assert!(h.shared.borrow().sent.is_empty());
    Ok(())
}

#[test]
fn interrupt_during_inference_finishes_frame_then_releases_in_order() -> Result<()> {
    let mut h = harness(vec![
        video(8, 8, PixelFormat::Rgba),
        video(8, 8, PixelFormat::Rgba),
        video(8, 8, PixelFormat::Rgba),
    ])?;
    let mut backend = Invert::new();
    backend.interrupt_on = Some((2, h.shutdown.clone()));

    let (outcome, frames) = relay(&mut h, &mut backend, &mut NoopObserver)?;
    outcome?;
    assert_eq!(frames, 2);
    assert_eq!(h.shared.borrow().captures, 2);

    let shared = h.shared.clone();
    h.session.close();
    assert_eq!(release_order(&shared), RELEASE_ORDER);
    Ok(())
}

#[test]
fn inference_failure_still_releases_every_handle_once() -> Result<()> {
    let mut h = harness(vec![
        video(8, 8, PixelFormat::Uyvy),
        video(8, 8, PixelFormat::Uyvy),
    ])?;
    let mut backend = Invert::new();
    backend.fail_on = Some(2);

    let (outcome, frames) = relay(&mut h, &mut backend, &mut NoopObserver)?;
    let err = outcome.err().ok_or_else(|| anyhow!("expected inference failure"))?;
    assert!(format!("{:#}", err).contains("CUDA out of memory"));
    assert_eq!(frames, 1);
    assert_eq!(h.shared.borrow().freed_video, 2);

    let shared = h.shared.clone();
    drop(h);
    assert_eq!(release_order(&shared), RELEASE_ORDER);
    Ok(())
}

#[test]
fn short_buffer_is_a_format_mismatch() -> Result<()> {
    let truncated = Capture::Video(VideoFrame::new(
        vec![0; 10],
        4,
        4,
        PixelFormat::Uyvy,
        FrameRate::NTSC,
    ));
    let mut h = harness(vec![truncated])?;
    let mut backend = Invert::new();

    let (outcome, frames) = relay(&mut h, &mut backend, &mut NoopObserver)?;
    let err = outcome.err().ok_or_else(|| anyhow!("expected codec failure"))?;
    assert_eq!(
        err.downcast_ref::<CodecError>(),
        Some(&CodecError::FormatMismatch {
            format: PixelFormat::Uyvy,
            width: 4,
            height: 4,
            expected: 32,
            actual: 10,
        })
    );
    assert_eq!(frames, 0);
    assert_eq!(backend.calls, 0);
    assert_eq!(h.shared.borrow().freed_video, 1);
    Ok(())
}
