//! Progress reporting for backup runs.
//!
//! One reporter is created per server. `NullReporter` discards everything
//! (quiet and JSON output), `TextReporter` emits tracing lines per file and
//! `RichReporter` draws a byte progress bar through a shared `MultiProgress`.

use super::progress::{format_bytes, format_duration, format_rate};
use crate::utils::logger::OutputFormat;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Receives lifecycle events from the backup manager.
pub trait ProgressReporter: Send + Sync {
    fn start(&self, total_bytes: u64, file_count: usize);
    fn file_start(&self, name: &str, size: u64);
    /// `written` is cumulative for the current file.
    fn file_progress(&self, name: &str, written: u64, size: u64);
    fn file_done(&self, name: &str);
    fn message(&self, text: &str);
    fn close(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn start(&self, _total_bytes: u64, _file_count: usize) {}
    fn file_start(&self, _name: &str, _size: u64) {}
    fn file_progress(&self, _name: &str, _written: u64, _size: u64) {}
    fn file_done(&self, _name: &str) {}
    fn message(&self, _text: &str) {}
    fn close(&self) {}
}

/// Plain log lines; per-chunk progress is not printed.
#[derive(Debug)]
pub struct TextReporter {
    started: Mutex<Option<Instant>>,
    total_bytes: AtomicU64,
}

impl TextReporter {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(None),
            total_bytes: AtomicU64::new(0),
        }
    }
}

impl Default for TextReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TextReporter {
    fn start(&self, total_bytes: u64, file_count: usize) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
        info!(
            files = file_count,
            total = %format_bytes(total_bytes),
            "Starting download"
        );
    }

    fn file_start(&self, name: &str, size: u64) {
        info!(file = name, size = %format_bytes(size), "Downloading");
    }

    fn file_progress(&self, _name: &str, _written: u64, _size: u64) {}

    fn file_done(&self, name: &str) {
        debug!(file = name, "Downloaded");
    }

    fn message(&self, text: &str) {
        info!("{}", text);
    }

    fn close(&self) {
        let started = self.started.lock().ok().and_then(|s| *s);
        if let Some(started) = started {
            let elapsed = started.elapsed();
            let total = self.total_bytes.load(Ordering::Relaxed);
            info!(
                elapsed = %format_duration(elapsed),
                rate = %format_rate(total, elapsed),
                "Download finished"
            );
        }
    }
}

/// Byte progress bar for one server.
pub struct RichReporter {
    multi: Arc<MultiProgress>,
    label: String,
    bar: Mutex<Option<ProgressBar>>,
    /// Bytes of files already finished
    completed: AtomicU64,
    /// Bytes of the current file
    current: AtomicU64,
}

impl RichReporter {
    pub fn new(multi: Arc<MultiProgress>, label: impl Into<String>) -> Self {
        Self {
            multi,
            label: label.into(),
            bar: Mutex::new(None),
            completed: AtomicU64::new(0),
            current: AtomicU64::new(0),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn truncate(name: &str, max: usize) -> String {
    let count = name.chars().count();
    if count <= max {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}

impl ProgressReporter for RichReporter {
    fn start(&self, total_bytes: u64, file_count: usize) {
        let bar = self.multi.add(ProgressBar::new(total_bytes.max(1)));
        bar.set_style(bar_style());
        bar.set_prefix(self.label.clone());
        bar.set_message(format!("{} files", file_count));
        self.completed.store(0, Ordering::Relaxed);
        self.current.store(0, Ordering::Relaxed);
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn file_start(&self, name: &str, _size: u64) {
        self.current.store(0, Ordering::Relaxed);
        self.with_bar(|bar| bar.set_message(truncate(name, 30)));
    }

    fn file_progress(&self, _name: &str, written: u64, _size: u64) {
        self.current.store(written, Ordering::Relaxed);
        let position = self.completed.load(Ordering::Relaxed) + written;
        self.with_bar(|bar| bar.set_position(position));
    }

    fn file_done(&self, _name: &str) {
        let done = self.current.swap(0, Ordering::Relaxed);
        let position = self.completed.fetch_add(done, Ordering::Relaxed) + done;
        self.with_bar(|bar| bar.set_position(position));
    }

    fn message(&self, text: &str) {
        let _ = self.multi.println(text);
    }

    fn close(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_with_message("done");
            }
        }
    }
}

/// Pick the reporter for an output mode. Rich output falls back to text
/// when stdout is not a terminal.
pub fn reporter_for(
    format: OutputFormat,
    quiet: bool,
    multi: &Arc<MultiProgress>,
    label: &str,
) -> Arc<dyn ProgressReporter> {
    if quiet || format == OutputFormat::Json {
        return Arc::new(NullReporter);
    }
    if format == OutputFormat::Rich && std::io::stdout().is_terminal() {
        return Arc::new(RichReporter::new(multi.clone(), label));
    }
    Arc::new(TextReporter::new())
}

/// A `MultiProgress` that draws to stdout at a bounded refresh rate.
pub fn shared_multi_progress() -> Arc<MultiProgress> {
    Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::stdout_with_hz(10)))
}
