//! Progress reporting for creation and repair
//!
//! Keeps the engine free of output formatting. Progress lines are throttled
//! to at most one per second and never influence control flow.

use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trait for reporting engine progress
pub trait ProgressReporter: Send + Sync {
    /// Report which memory mode was chosen
    fn report_mode(&self, operation: &str, split_count: u64, split_size: u64);

    /// Report `done` out of `total` units of work
    fn report_progress(&self, operation: &str, done: u64, total: u64);

    /// Report that an operation finished
    fn report_complete(&self, operation: &str);
}

/// Console reporter, par2cmdline-style `Creating: 12.3%` lines
pub struct ConsoleReporter {
    noise_level: i32,
    last_update: Mutex<Option<Instant>>,
}

impl ConsoleReporter {
    pub fn new(noise_level: i32) -> Self {
        Self {
            noise_level,
            last_update: Mutex::new(None),
        }
    }

    /// Whether a progress line is due; the first call always is
    fn due(&self) -> bool {
        let Ok(mut last) = self.last_update.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < Duration::from_secs(1) => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Progress in tenths of a percent
pub fn per_mille(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 1000;
    }
    ((done as u128 * 1000) / total as u128) as u64
}

impl ProgressReporter for ConsoleReporter {
    fn report_mode(&self, operation: &str, split_count: u64, split_size: u64) {
        if self.noise_level < 1 {
            return;
        }
        if split_count <= 1 {
            println!("{}: all blocks fit in memory", operation);
        } else {
            println!(
                "{}: split blocks into {} pieces of {} bytes",
                operation, split_count, split_size
            );
        }
    }

    fn report_progress(&self, operation: &str, done: u64, total: u64) {
        if self.noise_level < 0 || !self.due() {
            return;
        }
        let progress = per_mille(done, total);
        print!("{}: {}.{}%\r", operation, progress / 10, progress % 10);
        std::io::stdout().flush().unwrap_or(());
    }

    fn report_complete(&self, operation: &str) {
        if self.noise_level < 0 {
            return;
        }
        println!("{}: done.   ", operation);
    }
}

/// Silent reporter - no output
pub struct SilentReporter;

impl SilentReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SilentReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SilentReporter {
    fn report_mode(&self, _operation: &str, _split_count: u64, _split_size: u64) {}
    fn report_progress(&self, _operation: &str, _done: u64, _total: u64) {}
    fn report_complete(&self, _operation: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_mille() {
        assert_eq!(per_mille(0, 10), 0);
        assert_eq!(per_mille(1, 3), 333);
        assert_eq!(per_mille(10, 10), 1000);
        assert_eq!(per_mille(0, 0), 1000);
        assert_eq!(per_mille(u64::MAX, u64::MAX), 1000);
    }

    #[test]
    fn test_console_reporter_throttles() {
        let reporter = ConsoleReporter::new(0);
        assert!(reporter.due());
        assert!(!reporter.due());
    }

    #[test]
    fn test_silent_reporter_is_callable() {
        let reporter = SilentReporter::new();
        reporter.report_mode("Creating", 2, 2048);
        reporter.report_progress("Creating", 1, 2);
        reporter.report_complete("Creating");
    }
}
