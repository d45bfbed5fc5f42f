//! Progress bar and logging utilities.
//!
//! Stages receive a [`Progress`] value instead of consulting a global flag.
//! In log-only mode bars are hidden and periodic `[phase] n/total` lines are
//! logged instead, which keeps output tail-friendly.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// How many rows pass between log lines in log-only mode.
pub const LOG_INTERVAL_ROWS: u64 = 1_000_000;

/// Byte interval between log lines in log-only mode (256 MiB).
pub const LOG_INTERVAL_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    log_only: bool,
}

impl Progress {
    pub fn new(log_only: bool) -> Self {
        Self { log_only }
    }

    /// Progress that never draws anything; used by tests and library callers.
    pub fn hidden() -> Self {
        Self { log_only: true }
    }

    /// Byte-offset progress bar for reading a file of `len` bytes.
    pub fn bytes_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if self.log_only {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA: {eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
        }
        pb.set_message(msg.to_string());
        pb
    }

    /// Spinner counting rows of unknown total.
    pub fn spinner(&self, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if self.log_only {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{msg} {spinner} [{elapsed_precise}] {pos} rows ({per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        pb.set_message(msg.to_string());
        pb
    }

    /// Log progress against a known total when in log-only mode.
    /// A line is emitted whenever the position crosses an `interval` boundary
    /// between `previous` and `current`, and once at the end.
    pub fn log_progress(&self, phase: &str, previous: u64, current: u64, total: u64, interval: u64) {
        if !self.log_only || total == 0 || interval == 0 {
            return;
        }
        if previous / interval != current / interval || current == total {
            let pct = 100.0 * current as f64 / total as f64;
            tracing::info!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
        }
    }

    /// Log a running row count when in log-only mode.
    pub fn log_count(&self, phase: &str, current: u64) {
        if self.log_only && current > 0 && current % LOG_INTERVAL_ROWS == 0 {
            tracing::info!("[{}] {} rows", phase, current);
        }
    }
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = secs / 60.0;
        format!("{:.1}m", mins)
    }
}
