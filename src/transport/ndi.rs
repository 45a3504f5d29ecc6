//! NDI through the GStreamer NDI plugin (`ndisrc`, `ndisrcdemux`, `ndisink`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use gstreamer_video::VideoFormat;

use super::{Finder, Receiver, Sender, SourceInfo, Transport};
use crate::frame::{AudioFrame, Capture, FrameRate, OutputFrame, PixelFormat, VideoFrame};

const REQUIRED_ELEMENTS: [&str; 3] = ["ndisrc", "ndisrcdemux", "ndisink"];
const DEVICE_CLASS: &str = "Source/Network";
/// Caps the NDI device provider advertises for every announced source.
const NDI_CAPS: &str = "application/x-ndi";

pub struct NdiTransport {
    initialized: bool,
}

impl NdiTransport {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(anyhow!("NDI transport used before initialize"));
        }
        Ok(())
    }
}

impl Default for NdiTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NdiTransport {
    fn name(&self) -> &'static str {
        "ndi"
    }

    fn initialize(&mut self) -> Result<()> {
        gstreamer::init().context("initialize gstreamer")?;
        for element in REQUIRED_ELEMENTS {
            if gstreamer::ElementFactory::find(element).is_none() {
                return Err(anyhow!(
                    "gstreamer element '{}' not found; install the GStreamer NDI plugin",
                    element
                ));
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn create_finder(&mut self) -> Result<Box<dyn Finder>> {
        self.ensure_initialized()?;
        let monitor = gstreamer::DeviceMonitor::new();
        if monitor
            .add_filter(Some(DEVICE_CLASS), Some(&ndi_caps()))
            .is_none()
        {
            return Err(anyhow!(
                "device monitor rejected the {} filter for {}",
                DEVICE_CLASS,
                NDI_CAPS
            ));
        }
        monitor.start().context("start NDI device monitor")?;
        Ok(Box::new(NdiFinder { monitor }))
    }

    fn connect(&mut self, source: &SourceInfo) -> Result<Box<dyn Receiver>> {
        self.ensure_initialized()?;
        Ok(Box::new(NdiReceiver::new(source)?))
    }

    fn create_sender(&mut self, name: &str) -> Result<Box<dyn Sender>> {
        self.ensure_initialized()?;
        Ok(Box::new(NdiSender::new(name)?))
    }

    fn teardown(&mut self) {
        // gstreamer::deinit is unsafe and only valid at process exit.
        self.initialized = false;
        log::info!("NdiTransport: torn down");
    }
}

struct NdiFinder {
    monitor: gstreamer::DeviceMonitor,
}

impl Finder for NdiFinder {
    fn sources(&mut self, timeout: Duration) -> Result<Vec<SourceInfo>> {
        // Sources announce themselves asynchronously after the monitor starts.
        std::thread::sleep(timeout);
        let sources = self
            .monitor
            .devices()
            .into_iter()
            .map(|device| {
                let address = device
                    .properties()
                    .and_then(|props| props.get::<String>("url-address").ok());
                SourceInfo {
                    name: device.display_name().to_string(),
                    address,
                }
            })
            .collect();
        Ok(sources)
    }
}

impl Drop for NdiFinder {
    fn drop(&mut self) {
        self.monitor.stop();
        log::info!("NdiFinder: released");
    }
}

struct NdiReceiver {
    source: String,
    pipeline: gstreamer::Pipeline,
    video: gstreamer_app::AppSink,
    audio: gstreamer_app::AppSink,
}

impl NdiReceiver {
    fn new(source: &SourceInfo) -> Result<Self> {
        let description = format!(
            "ndisrc ndi-name=\"{}\" ! ndisrcdemux name=demux \
             demux.video ! queue ! videoconvert ! \
             video/x-raw,format=(string){{UYVY,BGRA,RGBA}} ! \
             appsink name=video sync=false max-buffers=1 drop=true \
             demux.audio ! queue ! appsink name=audio sync=false max-buffers=4 drop=true",
            escape(&source.name)
        );
        let pipeline = build_pipeline(&description, "NDI receive")?;
        let video = app_sink(&pipeline, "video")?;
        let audio = app_sink(&pipeline, "audio")?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set NDI receive pipeline to Playing")?;
        log::info!("NdiReceiver: connected to {}", source.name);

        Ok(Self {
            source: source.name.clone(),
            pipeline,
            video,
            audio,
        })
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    return Err(anyhow!("NDI source {} ended the stream", self.source));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Receiver for NdiReceiver {
    fn capture(&mut self, timeout: Duration) -> Result<Capture> {
        self.check_bus()?;

        if let Some(sample) = self.audio.try_pull_sample(gstreamer::ClockTime::ZERO) {
            return Ok(Capture::Audio(sample_to_audio(&sample)));
        }

        let timeout = gstreamer::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        match self.video.try_pull_sample(timeout) {
            Some(sample) => Ok(Capture::Video(sample_to_frame(&sample)?)),
            None => Ok(Capture::Timeout),
        }
    }

    // Samples are copied out of their GStreamer buffers, so release is a drop.
    fn free_video(&mut self, frame: VideoFrame) {
        drop(frame);
    }

    fn free_audio(&mut self, frame: AudioFrame) {
        drop(frame);
    }
}

impl Drop for NdiReceiver {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("NdiReceiver: failed to stop pipeline: {}", err);
        }
        log::info!("NdiReceiver: released {}", self.source);
    }
}

struct NdiSender {
    name: String,
    pipeline: gstreamer::Pipeline,
    appsrc: gstreamer_app::AppSrc,
    caps_size: Option<(u32, u32)>,
}

impl NdiSender {
    fn new(name: &str) -> Result<Self> {
        let description = format!(
            "appsrc name=src is-live=true format=time do-timestamp=true ! \
             videoconvert ! ndisink ndi-name=\"{}\"",
            escape(name)
        );
        let pipeline = build_pipeline(&description, "NDI send")?;
        let appsrc = pipeline
            .by_name("src")
            .context("appsrc element missing from pipeline")?
            .downcast::<gstreamer_app::AppSrc>()
            .map_err(|_| anyhow!("appsrc element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set NDI send pipeline to Playing")?;
        log::info!("NdiSender: publishing as {}", name);

        Ok(Self {
            name: name.to_string(),
            pipeline,
            appsrc,
            caps_size: None,
        })
    }

    fn ensure_caps(&mut self, frame: &OutputFrame) -> Result<()> {
        if self.caps_size == Some((frame.width, frame.height)) {
            return Ok(());
        }
        let info = gstreamer_video::VideoInfo::builder(VideoFormat::Rgba, frame.width, frame.height)
            .fps(gstreamer::Fraction::new(
                frame.frame_rate.numerator as i32,
                frame.frame_rate.denominator as i32,
            ))
            .build()
            .context("build NDI output video info")?;
        let caps = info.to_caps().context("build NDI output caps")?;
        self.appsrc.set_caps(Some(&caps));
        self.caps_size = Some((frame.width, frame.height));
        Ok(())
    }
}

impl Sender for NdiSender {
    fn send_video(&mut self, frame: &OutputFrame) -> Result<()> {
        self.ensure_caps(frame)?;
        let buffer = gstreamer::Buffer::from_slice(frame.data().to_vec());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|flow| anyhow!("NDI sender {} rejected frame: {:?}", self.name, flow))?;
        Ok(())
    }
}

impl Drop for NdiSender {
    fn drop(&mut self) {
        let _ = self.appsrc.end_of_stream();
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("NdiSender: failed to stop pipeline: {}", err);
        }
        log::info!("NdiSender: released {}", self.name);
    }
}

fn build_pipeline(description: &str, what: &str) -> Result<gstreamer::Pipeline> {
    gstreamer::parse::launch(description)
        .with_context(|| format!("build {} pipeline", what))?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow!("{} pipeline is not a Pipeline", what))
}

fn app_sink(pipeline: &gstreamer::Pipeline, name: &str) -> Result<gstreamer_app::AppSink> {
    pipeline
        .by_name(name)
        .with_context(|| format!("appsink '{}' missing from pipeline", name))?
        .downcast::<gstreamer_app::AppSink>()
        .map_err(|_| anyhow!("appsink '{}' has unexpected type", name))
}

fn ndi_caps() -> gstreamer::Caps {
    gstreamer::Caps::new_empty_simple(NDI_CAPS)
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

fn pixel_format(format: VideoFormat) -> PixelFormat {
    match format {
        VideoFormat::Uyvy => PixelFormat::Uyvy,
        VideoFormat::Rgba | VideoFormat::Rgbx => PixelFormat::Rgba,
        _ => PixelFormat::Bgra,
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<VideoFrame> {
    let buffer = sample.buffer().context("NDI sample missing buffer")?;
    let caps = sample.caps().context("NDI sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse NDI caps as video info")?;

    let width = info.width();
    let height = info.height();
    let format = pixel_format(info.format());
    let row_bytes = width as usize * format.bytes_per_pixel();
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map NDI buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("NDI buffer is shorter than its caps")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("NDI buffer row is out of bounds")?,
            );
        }
        pixels
    };

    let fps = info.fps();
    let frame_rate = if fps.numer() > 0 && fps.denom() > 0 {
        FrameRate::new(fps.numer() as u32, fps.denom() as u32)
    } else {
        FrameRate::NTSC
    };

    Ok(VideoFrame::new(pixels, width, height, format, frame_rate))
}

fn sample_to_audio(sample: &gstreamer::Sample) -> AudioFrame {
    let structure = sample.caps().and_then(|caps| caps.structure(0));
    let field = |name: &str| {
        structure
            .and_then(|s| s.get::<i32>(name).ok())
            .unwrap_or(0)
            .max(0) as u32
    };
    let sample_rate = field("rate");
    let channels = field("channels");
    let bytes = sample.buffer().map(|b| b.size()).unwrap_or(0);
    // ndisrcdemux emits interleaved F32LE.
    let samples_per_channel = if channels > 0 {
        (bytes / (channels as usize * 4)) as u32
    } else {
        0
    };
    AudioFrame {
        sample_rate,
        channels,
        samples_per_channel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_in_names() {
        assert_eq!(escape("CAM \"A\""), "CAM \\\"A\\\"");
        assert_eq!(escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn maps_video_formats() {
        assert_eq!(pixel_format(VideoFormat::Uyvy), PixelFormat::Uyvy);
        assert_eq!(pixel_format(VideoFormat::Rgbx), PixelFormat::Rgba);
        assert_eq!(pixel_format(VideoFormat::Bgrx), PixelFormat::Bgra);
        assert_eq!(pixel_format(VideoFormat::Nv12), PixelFormat::Bgra);
    }

    #[test]
    fn discovery_filter_only_admits_ndi_devices() -> Result<()> {
        gstreamer::init()?;
        let filter = ndi_caps();
        assert_eq!(
            filter.structure(0).map(|s| s.name().to_string()),
            Some(NDI_CAPS.to_string())
        );
        let ndi_device = gstreamer::Caps::new_empty_simple(NDI_CAPS);
        let rtsp_camera = gstreamer::Caps::new_empty_simple("application/x-rtp");
        assert!(filter.can_intersect(&ndi_device));
        assert!(!filter.can_intersect(&rtsp_camera));
        Ok(())
    }
}
