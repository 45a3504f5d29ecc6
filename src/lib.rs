//! diffusion-relay
//!
//! Receives a network video stream, runs every frame through an image-to-image
//! diffusion backend, and republishes the result as a new network stream.
//!
//! # Architecture
//!
//! The relay is a single-threaded blocking pipeline:
//!
//! ```text
//! discovery -> receiver -> codec::decode -> backend::transform -> codec::encode -> sender
//! ```
//!
//! Video transport and model inference are external collaborators reached through
//! two seams:
//!
//! - `transport`: `Transport`, `Finder`, `Receiver`, `Sender` (synthetic `stub`
//!   transport always available, NDI over GStreamer behind `transport-ndi`)
//! - `inference`: `DiffusionBackend` plus a `BackendRegistry` (`passthrough` always
//!   available, `http` and `tract` behind features)
//!
//! # Module Structure
//!
//! - `frame`: raw input frames, output frames, pixel formats, the `Capture` sum type
//! - `codec`: packed buffer <-> canonical RGB conversion
//! - `discovery`: listing and selecting sources
//! - `relay`: the stream loop state machine
//! - `stats`: throughput counters and formatting
//! - `ui`: stage spinners, session banner, in-place status line
//! - `config`: layered settings (defaults, TOML file, environment)
//! - `app`: one run from discovery to summary, with its exit outcome

pub mod app;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod frame;
pub mod inference;
pub mod relay;
pub mod stats;
pub mod transport;
pub mod ui;

pub use app::{RunOptions, RunOutcome};
pub use codec::{CodecError, FrameCodec};
pub use config::RelayConfig;
pub use frame::{AudioFrame, CanonicalImage, Capture, FrameRate, OutputFrame, PixelFormat, VideoFrame};
pub use inference::{
    Acceleration, BackendRegistry, CfgType, DiffusionBackend, DiffusionSettings, PassthroughBackend,
    Precision, PromptSettings,
};
pub use relay::{
    LoopState, NoopObserver, RelayObserver, RelayReport, StepOutcome, StreamLoop, RECEIVE_TIMEOUT,
};
pub use stats::{format_bytes, Stats, StatsSample};
pub use discovery::PromptInput;
pub use transport::{
    FrameGuard, Finder, Receiver, Sender, Session, SourceInfo, Transport, TransportKind,
};
