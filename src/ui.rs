use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::Write;
use std::time::{Duration, Instant};

use crate::relay::RelayObserver;
use crate::stats::StatsSample;

const BANNER_WIDTH: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    pub fn is_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.is_pretty() {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Reporter for the in-place status line.
    pub fn status(&self, banner: SessionBanner) -> StatusReporter {
        let spinner = if self.is_pretty() {
            Some(spinner("{msg}"))
        } else {
            None
        };
        StatusReporter { banner, spinner }
    }
}

fn spinner(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Everything printed once when the first frame arrives.
#[derive(Clone, Debug, Default)]
pub struct SessionBanner {
    pub source: String,
    pub output_name: String,
    pub output_size: (u32, u32),
    pub model: String,
    pub device: String,
    pub acceleration: String,
    pub prompt: String,
    pub negative_prompt: String,
}

impl SessionBanner {
    pub fn render(&self, input_size: (u32, u32)) -> String {
        let rule = "=".repeat(BANNER_WIDTH);
        let mut lines = vec![
            String::new(),
            rule.clone(),
            format!("{:^width$}", "STREAMING STARTED", width = BANNER_WIDTH),
            rule.clone(),
            format!("  Input Source:       {}", self.source),
            format!("  Input Resolution:   {}x{}", input_size.0, input_size.1),
            format!("  Output Source:      {}", self.output_name),
            format!(
                "  Output Resolution:  {}x{}",
                self.output_size.0, self.output_size.1
            ),
            format!("  Model:              {}", self.model),
            format!("  Device:             {}", self.device),
            format!("  Acceleration:       {}", self.acceleration),
            format!("  Prompt:             {}", self.prompt),
        ];
        if !self.negative_prompt.is_empty() {
            lines.push(format!("  Negative Prompt:    {}", self.negative_prompt));
        }
        lines.push(rule);
        lines.push(String::new());
        lines.push("Press Ctrl+C to stop".to_string());
        lines.push(String::new());
        lines.join("\n")
    }
}

/// Prints the banner on the first frame and rewrites the status line on every
/// stats sample. In plain mode status lines go to the log instead.
pub struct StatusReporter {
    banner: SessionBanner,
    spinner: Option<ProgressBar>,
}

impl StatusReporter {
    /// Leaves the last status line on screen.
    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.abandon();
        }
    }
}

impl RelayObserver for StatusReporter {
    fn session_started(&mut self, width: u32, height: u32) {
        let text = self.banner.render((width, height));
        match &self.spinner {
            Some(spinner) => spinner.suspend(|| print_stdout(&text)),
            None => print_stdout(&text),
        }
    }

    fn stats_sampled(&mut self, sample: &StatsSample) {
        let line = sample.status_line(chrono::Local::now().naive_local());
        match &self.spinner {
            Some(spinner) => spinner.set_message(line),
            None => log::info!("{}", line),
        }
    }
}

fn print_stdout(text: &str) {
    let mut stdout = std::io::stdout().lock();
    // A closed stdout must not stop the relay.
    let _ = writeln!(stdout, "{}", text).and_then(|_| stdout.flush());
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
