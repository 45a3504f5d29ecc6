//! One relay run from discovery to summary.
//!
//! The binary parses flags, installs the Ctrl-C handler and hands over here.
//! Every early exit is a `RunOutcome`; errors propagate after the session has
//! released its handles.

use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::codec::FrameCodec;
use crate::config::RelayConfig;
use crate::discovery::{list_sources, select_source};
use crate::inference::BackendRegistry;
use crate::relay::{StreamLoop, RECEIVE_TIMEOUT};
use crate::transport::{self, Session};
use crate::ui::{SessionBanner, Ui};

pub struct RunOptions {
    pub discovery_timeout: Duration,
    pub source_filter: Option<String>,
    pub list_only: bool,
    pub receive_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(5),
            source_filter: None,
            list_only: false,
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }
}

/// How a run ended without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Relayed until Ctrl-C.
    Stopped,
    /// `--list-sources` printed the sources.
    Listed,
    NoSources,
    /// Filter miss or cancelled prompt.
    NoSelection,
    /// Ctrl-C before the stream loop started.
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Stopped | RunOutcome::Listed => 0,
            RunOutcome::NoSources | RunOutcome::NoSelection | RunOutcome::Cancelled => 1,
        }
    }
}

impl From<RunOutcome> for ExitCode {
    fn from(outcome: RunOutcome) -> Self {
        ExitCode::from(outcome.exit_code())
    }
}

/// Raises the shutdown flag. Returns `true` when it was already raised, which
/// the Ctrl-C handler treats as a request to exit immediately.
pub fn request_shutdown(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

fn cancelled<W: Write>(shutdown: &AtomicBool, out: &mut W) -> Result<bool> {
    if !shutdown.load(Ordering::SeqCst) {
        return Ok(false);
    }
    writeln!(out, "\nCancelled by user")?;
    Ok(true)
}

/// Runs discovery, selection, connect, prepare and the stream loop.
///
/// `input` answers the selection prompt. `shutdown` is checked after each
/// blocking setup step and between loop iterations.
pub fn run<R: BufRead, W: Write>(
    config: &RelayConfig,
    options: &RunOptions,
    ui: &Ui,
    shutdown: &Arc<AtomicBool>,
    input: &mut R,
    out: &mut W,
) -> Result<RunOutcome> {
    let mut session = Session::start(transport::open(&config.transport)?)?;
    log::info!("using {} transport", session.transport_name());

    writeln!(
        out,
        "Searching for NDI sources (timeout: {}s)...",
        options.discovery_timeout.as_secs()
    )?;
    let sources = {
        let _stage = ui.stage("Discover sources");
        session.discover(options.discovery_timeout)?
    };
    if cancelled(shutdown, out)? {
        return Ok(RunOutcome::Cancelled);
    }
    if sources.is_empty() {
        writeln!(out, "No NDI sources found")?;
        writeln!(out, "No NDI sources available. Exiting.")?;
        return Ok(RunOutcome::NoSources);
    }

    writeln!(out)?;
    list_sources(out, &sources)?;
    if options.list_only {
        return Ok(RunOutcome::Listed);
    }

    let selected = select_source(&sources, options.source_filter.as_deref(), input, out)?;
    let Some(source) = selected else {
        writeln!(out, "No source selected. Exiting.")?;
        return Ok(RunOutcome::NoSelection);
    };
    if cancelled(shutdown, out)? {
        return Ok(RunOutcome::Cancelled);
    }
    writeln!(out, "\nSelected source: {}", source.name)?;

    writeln!(out, "\nCreating NDI receiver...")?;
    session.connect(&source)?;
    writeln!(out, "Creating NDI sender: {}", config.output_name)?;
    session.create_sender(&config.output_name)?;

    let mut registry = BackendRegistry::from_config(config)?;
    let mut backend = registry.backend_for(None, config.model.acceleration)?;
    {
        let _stage = ui.stage("Prepare diffusion backend");
        writeln!(out, "\nInitializing {} backend...", backend.name())?;
        writeln!(out, "  Model: {}", config.model.model_id)?;
        writeln!(out, "  Device: {}", config.model.device)?;
        writeln!(
            out,
            "  Resolution: {}x{}",
            config.model.width, config.model.height
        )?;
        writeln!(out, "  Prompt: {}", config.prompt.prompt)?;
        writeln!(out, "  Acceleration: {}", config.model.acceleration)?;
        backend.prepare(&config.model, &config.prompt)?;
        backend.warm_up()?;
    }
    if cancelled(shutdown, out)? {
        writeln!(out, "Cleaning up...")?;
        session.close();
        return Ok(RunOutcome::Cancelled);
    }

    let codec = FrameCodec::new(config.model.width, config.model.height)?;
    let mut reporter = ui.status(SessionBanner {
        source: source.name.clone(),
        output_name: config.output_name.clone(),
        output_size: (config.model.width, config.model.height),
        model: config.model.model_id.clone(),
        device: config.model.device.clone(),
        acceleration: config.model.acceleration.to_string(),
        prompt: config.prompt.prompt.clone(),
        negative_prompt: config.prompt.negative_prompt.clone(),
    });

    let (outcome, report) = {
        let (receiver, sender) = session.streams()?;
        let mut relay = StreamLoop::new(
            receiver,
            sender,
            backend.as_mut(),
            codec,
            config.prompt.prompt.clone(),
            Arc::clone(shutdown),
        )
        .with_receive_timeout(options.receive_timeout);
        let outcome = relay.run(&mut reporter);
        (outcome, relay.report())
    };
    reporter.finish();

    if shutdown.load(Ordering::SeqCst) {
        writeln!(out, "\n\nStopping...")?;
    }
    writeln!(out, "Cleaning up...")?;
    session.close();
    if report.frames > 0 {
        writeln!(out, "\n{}", report)?;
    }
    writeln!(out, "Done!")?;

    outcome?;
    Ok(RunOutcome::Stopped)
}
