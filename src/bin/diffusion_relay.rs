//! diffusion_relay - receive an NDI stream, run every frame through a diffusion
//! backend, and publish the result as a new NDI source.
//!
//! Flow:
//! 1. Discover sources and pick one (filter, auto-select, or prompt)
//! 2. Connect the receiver and create the sender
//! 3. Prepare the diffusion backend
//! 4. Relay frames until Ctrl-C, then release everything and print a summary

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use diffusion_relay::app::{self, RunOptions};
use diffusion_relay::discovery::PromptInput;
use diffusion_relay::ui::Ui;
use diffusion_relay::{Acceleration, RelayConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Relay an NDI stream through an image-to-image diffusion model"
)]
struct Args {
    /// Seconds to wait for NDI sources to announce themselves.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Acceleration requested from the backend (default: xformers).
    #[arg(long, value_enum)]
    acceleration: Option<Acceleration>,

    /// Compute device, e.g. cuda, cuda:1, cpu (default: cuda).
    #[arg(long)]
    device: Option<String>,

    /// Select the first source whose name contains this text (case-insensitive).
    #[arg(long = "ndi-source")]
    ndi_source: Option<String>,

    /// TOML config file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Diffusion backend: passthrough, http, tract.
    #[arg(long)]
    backend: Option<String>,

    /// Video transport: ndi or stub.
    #[arg(long)]
    transport: Option<String>,

    /// Name the output source is published under.
    #[arg(long)]
    output_name: Option<String>,

    /// UI mode: auto, plain, pretty.
    #[arg(long, default_value = "auto")]
    ui: String,

    /// Print discovered sources and exit.
    #[arg(long)]
    list_sources: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let mut config = RelayConfig::load(args.config.as_deref())?;
    apply_args(&mut config, &args)?;
    config.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        // A second Ctrl-C gives up on a stuck discovery or inference call.
        if app::request_shutdown(&flag) {
            eprintln!("\nForced exit");
            std::process::exit(130);
        }
    })
    .context("error setting Ctrl-C handler")?;

    let is_tty = io::stderr().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let options = RunOptions {
        discovery_timeout: Duration::from_secs(args.timeout),
        source_filter: args.ndi_source.clone(),
        list_only: args.list_sources,
        ..RunOptions::default()
    };
    let mut input = PromptInput::stdin(Arc::clone(&shutdown));
    let outcome = app::run(
        &config,
        &options,
        &ui,
        &shutdown,
        &mut input,
        &mut io::stdout(),
    )?;
    Ok(outcome.into())
}

fn apply_args(config: &mut RelayConfig, args: &Args) -> Result<()> {
    if let Some(acceleration) = args.acceleration {
        config.set_acceleration(acceleration);
    }
    if let Some(device) = args.device.as_deref() {
        config.set_device(device);
    }
    if let Some(backend) = &args.backend {
        config.backend.name = backend.clone();
    }
    if let Some(kind) = args.transport.as_deref() {
        config.transport.kind = kind.parse()?;
    }
    if let Some(name) = &args.output_name {
        config.output_name = name.clone();
    }
    Ok(())
}
