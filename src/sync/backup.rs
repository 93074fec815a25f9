//! Poll-driven scheduling of periodic backups.
//!
//! The engine owns no timers; the host drives a scheduler by calling
//! [`BackupScheduler::tick`] from its own loop and running a backup whenever
//! it returns true.

use std::time::{Duration, Instant};

/// How often periodic backups fire by default.
pub const DEFAULT_BACKUP_INTERVAL_SECS: u64 = 30;

/// Tracks when the next periodic backup is due.
#[derive(Debug)]
pub struct BackupScheduler {
    interval: Duration,
    last_run: Option<Instant>,
    enabled: bool,
}

impl Default for BackupScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupScheduler {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(DEFAULT_BACKUP_INTERVAL_SECS))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
            enabled: true,
        }
    }

    /// A disabled scheduler never reports a backup as due.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when a backup is due. The first tick after construction (or
    /// after [`reset`](Self::reset)) is always due.
    pub fn should_run(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        }
    }

    /// Records that a backup just ran.
    pub fn mark_run(&mut self) {
        self.last_run = Some(Instant::now());
    }

    /// Combined poll: returns true and arms the next interval when a backup
    /// is due.
    pub fn tick(&mut self) -> bool {
        if self.should_run() {
            self.mark_run();
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last_run = None;
    }
}

// =============================================================================
// TESTS
// =============================================================================
