//! Timers and buffers used by the controller to coalesce scan requests.
//!
//! Nothing here sleeps or spawns: timers are deadlines compared against the
//! `now` the caller passes in, so the controller stays a plain state machine
//! and tests can drive time by hand.

use crate::core::FrameworkId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Restartable single-shot timer.
#[derive(Debug, Clone)]
pub struct Deadline {
    interval: Duration,
    due: Option<Instant>,
}

impl Deadline {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// (Re)start the timer; a running timer is pushed back.
    pub fn start(&mut self, now: Instant) {
        self.due = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.due = None;
    }

    pub fn is_active(&self) -> bool {
        self.due.is_some()
    }

    pub fn due(&self) -> Option<Instant> {
        self.due
    }

    /// Stop and report the timer if it is due at `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if due <= now => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}

/// Work remembered while a scan could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingUpdate {
    #[default]
    None,
    /// Rescan the buffered files.
    Partial,
    /// Rescan everything; subsumes any partial update.
    Full,
}

/// Frameworks a pending full update covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateScope {
    /// No update requested yet.
    #[default]
    Unset,
    All,
    Only(BTreeSet<FrameworkId>),
}

impl UpdateScope {
    /// Merge a request for `framework` (`None` = every framework).
    pub fn widen(&mut self, framework: Option<FrameworkId>) {
        let Some(id) = framework else {
            *self = Self::All;
            return;
        };
        match self {
            Self::All => {}
            Self::Only(ids) => {
                ids.insert(id);
            }
            Self::Unset => *self = Self::Only(BTreeSet::from([id])),
        }
    }

    /// Merge another scope into this one.
    pub fn merge(&mut self, other: UpdateScope) {
        match other {
            Self::Unset => {}
            Self::All => *self = Self::All,
            Self::Only(ids) => {
                for id in ids {
                    self.widen(Some(id));
                }
            }
        }
    }
}

/// Buffer of single-file change notifications plus the reparse timer.
///
/// The first file starts the timer; repeating the same file restarts it; a
/// second distinct file switches the timer to a zero interval so the whole
/// buffer is flushed on the next tick.
#[derive(Debug, Clone)]
pub struct ReparseBuffer {
    files: BTreeSet<PathBuf>,
    timer: Deadline,
    delay: Duration,
    timed_out: bool,
}

impl ReparseBuffer {
    pub fn new(delay: Duration) -> Self {
        Self {
            files: BTreeSet::new(),
            timer: Deadline::new(delay),
            delay,
            timed_out: false,
        }
    }

    pub fn files(&self) -> &BTreeSet<PathBuf> {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_timer_active(&self) -> bool {
        self.timer.is_active()
    }

    pub fn due(&self) -> Option<Instant> {
        self.timer.due()
    }

    /// Buffer one file while the controller is idle.
    ///
    /// Returns `false` when the file should be scanned right away, which is
    /// the case for the flush triggered by the timer itself.
    pub fn hold(&mut self, file: &Path, now: Instant) -> bool {
        if self.timed_out {
            return false;
        }
        match self.files.len() {
            0 => {
                self.files.insert(file.to_path_buf());
                self.timer.set_interval(self.delay);
                self.timer.start(now);
            }
            1 if self.files.contains(file) => self.timer.start(now),
            _ => {
                self.files.insert(file.to_path_buf());
                self.timer.stop();
                self.timer.set_interval(Duration::ZERO);
                self.timed_out = false;
                self.timer.start(now);
            }
        }
        true
    }

    /// Add files without touching the timer.
    pub fn merge<I: IntoIterator<Item = PathBuf>>(&mut self, files: I) {
        self.files.extend(files);
    }

    /// Fire the timer if due, returning the files to scan.
    ///
    /// The buffer is kept: starting the scan clears it.
    pub fn fire(&mut self, now: Instant) -> Option<BTreeSet<PathBuf>> {
        if !self.timer.fire(now) || self.files.is_empty() {
            return None;
        }
        self.timed_out = true;
        Some(self.files.clone())
    }

    /// Called when a scan starts: stop the timer and empty the buffer.
    pub fn take(&mut self) -> BTreeSet<PathBuf> {
        self.timer.stop();
        self.timed_out = false;
        std::mem::take(&mut self.files)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}
