//! Throughput counters for a relay run.
//!
//! Counters only grow. A sample is produced at most once per sampling interval
//! (one second by default); fps is the cumulative average since start, byte
//! rates are measured over the interval since the previous sample.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct Stats {
    bytes_received: u64,
    bytes_sent: u64,
    frames: u64,
    last_received: u64,
    last_sent: u64,
    started: Instant,
    last_sample: Instant,
    interval: Duration,
}

/// One status-line worth of numbers.
#[derive(Clone, Debug, PartialEq)]
pub struct StatsSample {
    pub frames: u64,
    pub fps: f64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub received_per_sec: f64,
    pub sent_per_sec: f64,
    pub elapsed: Duration,
}

/// End-of-run summary.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub frames: u64,
    pub elapsed: Duration,
}

impl Stats {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(now: Instant) -> Self {
        Self {
            bytes_received: 0,
            bytes_sent: 0,
            frames: 0,
            last_received: 0,
            last_sent: 0,
            started: now,
            last_sample: now,
            interval: SAMPLE_INTERVAL,
        }
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received = self.bytes_received.saturating_add(bytes as u64);
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
    }

    pub fn record_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn sample(&mut self) -> Option<StatsSample> {
        self.sample_at(Instant::now())
    }

    /// Produces a sample when at least one interval has passed since the last one.
    pub fn sample_at(&mut self, now: Instant) -> Option<StatsSample> {
        let since_last = now.saturating_duration_since(self.last_sample);
        if since_last < self.interval || since_last.is_zero() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.started);
        let window = since_last.as_secs_f64();

        let sample = StatsSample {
            frames: self.frames,
            fps: per_second(self.frames as f64, elapsed.as_secs_f64()),
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            received_per_sec: (self.bytes_received - self.last_received) as f64 / window,
            sent_per_sec: (self.bytes_sent - self.last_sent) as f64 / window,
            elapsed,
        };

        self.last_received = self.bytes_received;
        self.last_sent = self.bytes_sent;
        self.last_sample = now;
        Some(sample)
    }

    pub fn summary(&self) -> Summary {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&self, now: Instant) -> Summary {
        Summary {
            frames: self.frames,
            elapsed: now.saturating_duration_since(self.started),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSample {
    /// `YYYY-MM-DD HH:MM:SS | FPS: .. | RX: .. (../s) | TX: .. (../s) | Frames: N`
    pub fn status_line(&self, at: NaiveDateTime) -> String {
        format!(
            "{} | FPS: {:.2} | RX: {} ({}/s) | TX: {} ({}/s) | Frames: {}",
            at.format("%Y-%m-%d %H:%M:%S"),
            self.fps,
            format_bytes(self.bytes_received),
            format_rate(self.received_per_sec),
            format_bytes(self.bytes_sent),
            format_rate(self.sent_per_sec),
            self.frames
        )
    }
}

impl Summary {
    pub fn average_fps(&self) -> f64 {
        per_second(self.frames as f64, self.elapsed.as_secs_f64())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} frames in {:.1}s ({:.2} FPS average)",
            self.frames,
            self.elapsed.as_secs_f64(),
            self.average_fps()
        )
    }
}

/// Formats a byte count with decimal prefixes (1 KB = 1000 B).
pub fn format_bytes(bytes: u64) -> String {
    format_rate(bytes as f64)
}

/// Same as `format_bytes`, for fractional per-second rates.
pub fn format_rate(bytes: f64) -> String {
    if bytes >= 1_000_000_000.0 {
        format!("{:.2} GB", bytes / 1_000_000_000.0)
    } else if bytes >= 1_000_000.0 {
        format!("{:.2} MB", bytes / 1_000_000.0)
    } else if bytes >= 1_000.0 {
        format!("{:.2} KB", bytes / 1_000.0)
    } else {
        format!("{} B", bytes.max(0.0).round() as u64)
    }
}

fn per_second(count: f64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        count / seconds
    } else {
        0.0
    }
}
