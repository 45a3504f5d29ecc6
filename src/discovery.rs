//! Listing and choosing among discovered sources.
//!
//! Selection never fails hard: a miss or a cancelled prompt yields `None` and
//! the caller decides how to exit.

use std::io::{self, BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::transport::SourceInfo;

const PROMPT_POLL: Duration = Duration::from_millis(50);

/// Prints `Found N NDI source(s):` followed by `  [idx] name` per source.
pub fn list_sources<W: Write>(out: &mut W, sources: &[SourceInfo]) -> Result<()> {
    writeln!(out, "Found {} NDI source(s):", sources.len())?;
    for (index, source) in sources.iter().enumerate() {
        writeln!(out, "  [{}] {}", index, source.name)?;
    }
    Ok(())
}

/// First source whose name contains `filter`, ignoring case.
pub fn find_source_by_name<'a>(sources: &'a [SourceInfo], filter: &str) -> Option<&'a SourceInfo> {
    let needle = filter.to_lowercase();
    sources
        .iter()
        .find(|source| source.name.to_lowercase().contains(&needle))
}

/// Picks a source from `sources`.
///
/// - With a filter, the first case-insensitive substring match wins.
/// - With exactly one source and no filter, it is chosen without prompting.
/// - Otherwise the user is prompted on `output` and answers on `input` until
///   the answer is a valid index. EOF cancels.
pub fn select_source<R: BufRead, W: Write>(
    sources: &[SourceInfo],
    filter: Option<&str>,
    input: &mut R,
    output: &mut W,
) -> Result<Option<SourceInfo>> {
    if sources.is_empty() {
        return Ok(None);
    }

    if let Some(filter) = filter {
        return match find_source_by_name(sources, filter) {
            Some(source) => {
                writeln!(output, "Auto-selected NDI source: {}", source.name)?;
                Ok(Some(source.clone()))
            }
            None => {
                writeln!(output, "ERROR: No NDI source matching '{}' found", filter)?;
                Ok(None)
            }
        };
    }

    if sources.len() == 1 {
        writeln!(
            output,
            "Auto-selecting only available source: {}",
            sources[0].name
        )?;
        return Ok(Some(sources[0].clone()));
    }

    let last = sources.len() - 1;
    let mut line = String::new();
    loop {
        write!(output, "Select NDI source [0-{}]: ", last)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output, "\nCancelled by user")?;
            return Ok(None);
        }
        match line.trim().parse::<usize>() {
            Ok(index) if index <= last => return Ok(Some(sources[index].clone())),
            Ok(_) => writeln!(output, "Invalid choice. Please enter 0-{}", last)?,
            Err(_) => writeln!(output, "Invalid input. Please enter a number")?,
        }
    }
}

/// Line input for the selection prompt that reads as EOF once `shutdown` is
/// raised, so Ctrl-C cancels a pending prompt.
pub struct PromptInput {
    lines: mpsc::Receiver<String>,
    shutdown: Arc<AtomicBool>,
    pending: Vec<u8>,
    pos: usize,
}

impl PromptInput {
    pub fn new(lines: mpsc::Receiver<String>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            lines,
            shutdown,
            pending: Vec::new(),
            pos: 0,
        }
    }

    /// Reads stdin on a background thread.
    pub fn stdin(shutdown: Arc<AtomicBool>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self::new(rx, shutdown)
    }
}

impl Read for PromptInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for PromptInput {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.pending.len() {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(&[]);
            }
            match self.lines.recv_timeout(PROMPT_POLL) {
                Ok(line) => {
                    self.pending = line.into_bytes();
                    self.pending.push(b'\n');
                    self.pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(&[]),
            }
        }
        Ok(&self.pending[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.pending.len());
    }
}
