//! The parser controller: decides when to scan and what to scan.
//!
//! The controller is a synchronous state machine. Every input carries the
//! current `Instant`, and every reaction is returned as a list of
//! [`Directive`]s for the engine to carry out (start a scan on the worker
//! pool, cancel one, reset the tree, report completion). Timers are plain
//! deadlines fired by [`ParserController::tick`].
//!
//! The one rule that matters most: a scan never runs while the external
//! indexer is busy. Starting indexing cancels the running scan and
//! remembers it for replay once indexing has finished.

use super::debounce::{Deadline, PendingUpdate, ReparseBuffer, UpdateScope};
use crate::config::ScanSettings;
use crate::core::{FrameworkId, ScanId, ScanKind};
use crate::project::{IndexerEvent, ProjectSource, TaskPhase};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Scheduling state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserState {
    Idle,
    PartialParse,
    FullParse,
    /// Terminal; every request is ignored.
    Shutdown,
    /// Paused by the user; left only through `Idle`.
    DisabledTemporarily,
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PartialParse => "partial-parse",
            Self::FullParse => "full-parse",
            Self::Shutdown => "shutdown",
            Self::DisabledTemporarily => "disabled",
        };
        f.write_str(name)
    }
}

/// How a scan ended, as reported by the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Success,
    /// The scan could not run (e.g. the worker pool failed to start).
    Failed,
    Canceled,
}

/// Everything the worker pool needs to run one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub id: ScanId,
    pub kind: ScanKind,
    pub files: BTreeSet<PathBuf>,
    /// Participating frameworks in priority order.
    pub frameworks: Vec<FrameworkId>,
    /// Whether the scan was restricted to explicitly named frameworks.
    pub scoped: bool,
}

/// Lifecycle signals for tree consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerSignal {
    /// Scanning settled; the tree may be swept.
    ScanFinished,
    /// Scanning was raced by the indexer or failed; a retry is scheduled.
    ScanFailed,
}

/// Action requested from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    StartScan(ScanPlan),
    /// Stop the scan, wait for in-flight parser calls, drop its results.
    CancelScan { id: ScanId },
    /// Drop every tree item and the identity caches.
    ResetTree,
    Signal(ControllerSignal),
}

#[derive(Debug, Clone)]
struct RunningScan {
    id: ScanId,
    kind: ScanKind,
    files: BTreeSet<PathBuf>,
}

enum ScanRequest {
    Full(UpdateScope),
    Files(BTreeSet<PathBuf>),
}

/// Debounced scheduler of test scans.
pub struct ParserController {
    state: ParserState,
    project: Arc<dyn ProjectSource>,
    frameworks: Vec<FrameworkId>,
    update_timer: Deadline,
    update_scope: UpdateScope,
    buffer: ReparseBuffer,
    pending: PendingUpdate,
    indexer_busy: bool,
    dirty: bool,
    parsing_failed: bool,
    running: Option<RunningScan>,
    last_scan: u64,
}

impl fmt::Debug for ParserController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserController")
            .field("state", &self.state)
            .field("frameworks", &self.frameworks)
            .field("pending", &self.pending)
            .field("indexer_busy", &self.indexer_busy)
            .field("dirty", &self.dirty)
            .field("running", &self.running.as_ref().map(|r| r.id))
            .finish_non_exhaustive()
    }
}

impl ParserController {
    pub fn new(project: Arc<dyn ProjectSource>, settings: &ScanSettings) -> Self {
        Self {
            state: ParserState::Idle,
            project,
            frameworks: Vec::new(),
            update_timer: Deadline::new(settings.update_delay()),
            update_scope: UpdateScope::Unset,
            buffer: ReparseBuffer::new(settings.reparse_delay()),
            pending: PendingUpdate::None,
            indexer_busy: false,
            dirty: false,
            parsing_failed: false,
            running: None,
            last_scan: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.state, ParserState::FullParse | ParserState::PartialParse)
    }

    pub fn running_scan(&self) -> Option<ScanId> {
        self.running.as_ref().map(|r| r.id)
    }

    /// Active frameworks in priority order.
    pub fn frameworks(&self) -> &[FrameworkId] {
        &self.frameworks
    }

    pub fn pending_update(&self) -> PendingUpdate {
        self.pending
    }

    pub fn postponed_files(&self) -> &BTreeSet<PathBuf> {
        self.buffer.files()
    }

    pub fn is_update_scheduled(&self) -> bool {
        self.update_timer.is_active()
    }

    pub fn is_indexer_busy(&self) -> bool {
        self.indexer_busy
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.update_timer.due(), self.buffer.due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn busy(&self) -> bool {
        self.indexer_busy || self.project.is_parsing()
    }

    /// Schedule a debounced full rescan, optionally limited to one framework.
    ///
    /// Calls while an update is already scheduled only widen its scope.
    pub fn request_update(&mut self, framework: Option<FrameworkId>, now: Instant) {
        if self.state == ParserState::Shutdown {
            return;
        }
        if self.frameworks.is_empty() {
            debug!("no active frameworks, ignoring update request");
            return;
        }
        self.update_scope.widen(framework);
        self.schedule_update(now);
    }

    fn schedule_update(&mut self, now: Instant) {
        if self.update_timer.is_active() {
            trace!("update already scheduled");
            return;
        }
        debug!(delay_ms = self.update_timer.interval().as_millis() as u64, "scheduling full update");
        self.update_timer.start(now);
    }

    /// Request a rescan of one changed file.
    pub fn notify_file_changed(&mut self, path: &Path, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        if !self.project.is_known_file(path) {
            trace!(file = %path.display(), "ignoring change of file outside the project");
            return out;
        }
        if self.pending == PendingUpdate::Full {
            trace!(file = %path.display(), "full update pending, ignoring file change");
            return out;
        }
        let files = BTreeSet::from([path.to_path_buf()]);
        self.scan_for_tests(ScanRequest::Files(files), now, &mut out);
        out
    }

    /// Fire due timers.
    pub fn tick(&mut self, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.update_timer.fire(now) {
            self.update_now(now, &mut out);
        }
        if let Some(files) = self.buffer.fire(now) {
            debug!(files = files.len(), "reparse timer fired");
            self.scan_for_tests(ScanRequest::Files(files), now, &mut out);
        }
        out
    }

    /// Request a state transition.
    pub fn set_state(&mut self, target: ParserState, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.state == ParserState::Shutdown {
            return out;
        }
        debug!(current = %self.state, %target, "set_state");
        if target == ParserState::Shutdown {
            return self.about_to_shutdown(true);
        }
        if self.busy() && target != ParserState::DisabledTemporarily {
            debug!("indexer or project busy, marking dirty instead of changing state");
            self.dirty = true;
            return out;
        }

        match target {
            ParserState::FullParse | ParserState::PartialParse => {
                debug!(%target, "scan states are entered through scan requests only");
            }
            ParserState::DisabledTemporarily => {
                self.abort_running(&mut out);
                self.state = ParserState::DisabledTemporarily;
            }
            ParserState::Idle => {
                if self.is_scanning() {
                    debug!("not switching to idle, scan is running");
                    return out;
                }
                let was_disabled = self.state == ParserState::DisabledTemporarily;
                self.state = ParserState::Idle;
                if was_disabled {
                    self.request_update(None, now);
                } else {
                    self.replay_postponed(now, &mut out);
                }
            }
            ParserState::Shutdown => {}
        }
        out
    }

    fn replay_postponed(&mut self, now: Instant, out: &mut Vec<Directive>) {
        if self.pending == PendingUpdate::Full || self.dirty {
            self.request_update(None, now);
        } else if self.pending == PendingUpdate::Partial {
            self.pending = PendingUpdate::None;
            if !self.buffer.is_timer_active() {
                let files = self.buffer.files().clone();
                debug!(files = files.len(), "replaying postponed files");
                self.scan_for_tests(ScanRequest::Files(files), now, out);
            }
        }
    }

    /// Cancel any running scan; final shutdown is terminal.
    pub fn about_to_shutdown(&mut self, final_shutdown: bool) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.state == ParserState::Shutdown {
            return out;
        }
        info!(final_shutdown, "stopping test scans");
        self.abort_running(&mut out);
        if final_shutdown {
            self.state = ParserState::Shutdown;
            self.update_timer.stop();
            self.buffer.take();
            self.pending = PendingUpdate::None;
        } else {
            self.state = ParserState::Idle;
        }
        out
    }

    /// Replace the active frameworks (priority order).
    ///
    /// A running scan is canceled and restarted as a full scan.
    pub fn sync_frameworks(&mut self, active: Vec<FrameworkId>, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        debug!(frameworks = ?active, "syncing frameworks");
        self.frameworks = active;
        if self.state == ParserState::Shutdown {
            return out;
        }

        if self.frameworks.is_empty() {
            self.abort_running(&mut out);
            self.update_timer.stop();
            self.buffer.take();
            self.pending = PendingUpdate::None;
            self.update_scope = UpdateScope::Unset;
        } else if self.is_scanning() {
            self.buffer.clear();
            self.pending = PendingUpdate::Full;
            self.update_scope = UpdateScope::All;
            self.cancel_running(ScanOutcome::Canceled, now, &mut out);
        } else if self.state == ParserState::Idle {
            self.request_update(None, now);
        }
        out
    }

    /// The project was replaced: drop everything and rescan.
    pub fn on_project_changed(&mut self, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.state == ParserState::Shutdown {
            return out;
        }
        info!("project changed, resetting test tree");
        self.abort_running(&mut out);
        self.update_timer.stop();
        self.buffer.take();
        self.pending = PendingUpdate::None;
        self.update_scope = UpdateScope::Unset;
        self.dirty = false;
        self.parsing_failed = false;
        out.push(Directive::ResetTree);
        self.request_update(None, now);
        out
    }

    /// The project's build information changed.
    pub fn on_project_parts_updated(&mut self, now: Instant) {
        if self.busy() {
            debug!("project or indexer busy, postponing full update");
            self.pending = PendingUpdate::Full;
            self.update_scope.widen(None);
        } else {
            self.request_update(None, now);
        }
    }

    /// React to indexer progress. Only the indexing task kind matters.
    pub fn on_indexer_event(&mut self, event: &IndexerEvent, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        if !event.is_indexing() {
            trace!(?event, "ignoring indexer event");
            return out;
        }
        match event.phase {
            TaskPhase::Started => {
                self.indexer_busy = true;
                let Some(run) = self.running.as_ref() else {
                    return out;
                };
                info!(scan = %run.id, "indexer started, canceling running scan");
                if run.kind == ScanKind::Full || self.pending == PendingUpdate::Full {
                    self.pending = PendingUpdate::Full;
                } else {
                    let files = run.files.clone();
                    self.buffer.merge(files);
                    self.pending = PendingUpdate::Partial;
                }
                self.parsing_failed = true;
                self.cancel_running(ScanOutcome::Canceled, now, &mut out);
                out.push(Directive::Signal(ControllerSignal::ScanFailed));
                out
            }
            TaskPhase::AllFinished => {
                self.indexer_busy = false;
                if self.state == ParserState::DisabledTemporarily {
                    debug!("indexer finished while disabled, staying disabled");
                    return out;
                }
                self.set_state(ParserState::Idle, now)
            }
        }
    }

    /// Completion report from the worker pool. Stale scan ids are ignored.
    pub fn on_scan_finished(&mut self, id: ScanId, outcome: ScanOutcome, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        match self.running.take() {
            Some(run) if run.id == id => self.finish(run, outcome, now, &mut out),
            other => {
                trace!(scan = %id, "ignoring completion of stale scan");
                self.running = other;
            }
        }
        out
    }

    fn update_now(&mut self, now: Instant, out: &mut Vec<Directive>) {
        self.update_timer.stop();
        let scope = std::mem::take(&mut self.update_scope);
        if self.busy() {
            debug!("indexer busy, postponing full update");
            self.pending = PendingUpdate::Full;
            self.buffer.clear();
            self.update_scope.merge(scope);
            return;
        }
        self.pending = PendingUpdate::None;
        self.scan_for_tests(ScanRequest::Full(scope), now, out);
    }

    fn scan_for_tests(&mut self, request: ScanRequest, now: Instant, out: &mut Vec<Directive>) {
        if self.state == ParserState::Shutdown || self.frameworks.is_empty() {
            return;
        }
        if self.state == ParserState::DisabledTemporarily {
            trace!("scanning disabled, dropping request");
            return;
        }
        if self.postpone(&request, now, out) {
            return;
        }
        if self.busy() {
            match request {
                ScanRequest::Full(scope) => {
                    self.pending = PendingUpdate::Full;
                    self.buffer.clear();
                    self.update_scope.merge(scope);
                }
                ScanRequest::Files(files) if self.pending != PendingUpdate::Full => {
                    self.buffer.merge(files);
                    self.pending = PendingUpdate::Partial;
                }
                ScanRequest::Files(_) => {}
            }
            debug!("indexer or project busy, scan postponed");
            return;
        }

        let buffered = self.buffer.take();
        match request {
            ScanRequest::Full(scope) => self.start_full(scope, now, out),
            ScanRequest::Files(mut files) => {
                files.extend(buffered);
                self.state = ParserState::PartialParse;
                let frameworks = self.frameworks.clone();
                self.start(ScanKind::Partial, files, frameworks, false, out);
            }
        }
    }

    /// Apply the postponement policy. Returns whether the request was
    /// absorbed (buffered, merged, dropped or turned into a cancellation).
    fn postpone(&mut self, request: &ScanRequest, now: Instant, out: &mut Vec<Directive>) -> bool {
        match self.state {
            ParserState::Idle => match request {
                ScanRequest::Files(files) if files.len() == 1 => files
                    .iter()
                    .next()
                    .is_some_and(|file| self.buffer.hold(file, now)),
                _ => false,
            },
            ParserState::FullParse | ParserState::PartialParse => {
                match request {
                    ScanRequest::Full(scope) => {
                        debug!("full update requested while scanning, canceling running scan");
                        self.buffer.clear();
                        self.pending = PendingUpdate::Full;
                        self.update_scope.merge(scope.clone());
                        self.cancel_running(ScanOutcome::Canceled, now, out);
                    }
                    ScanRequest::Files(_) if self.pending == PendingUpdate::Full => {
                        trace!("full update pending, dropping file request");
                    }
                    ScanRequest::Files(files) => {
                        self.buffer.merge(files.iter().cloned());
                        self.pending = PendingUpdate::Partial;
                    }
                }
                true
            }
            ParserState::Shutdown | ParserState::DisabledTemporarily => true,
        }
    }

    fn start_full(&mut self, scope: UpdateScope, now: Instant, out: &mut Vec<Directive>) {
        let files: BTreeSet<PathBuf> = self.project.source_files().into_iter().collect();
        if files.is_empty() {
            debug!("project reports no source files yet, retrying later");
            self.update_scope.merge(scope);
            self.schedule_update(now);
            return;
        }

        let (frameworks, scoped) = match scope {
            UpdateScope::Only(ids) => (
                self.frameworks
                    .iter()
                    .filter(|id| ids.contains(*id))
                    .cloned()
                    .collect::<Vec<_>>(),
                true,
            ),
            UpdateScope::Unset | UpdateScope::All => (self.frameworks.clone(), false),
        };
        if frameworks.is_empty() {
            debug!("requested frameworks are no longer active");
            return;
        }
        self.state = ParserState::FullParse;
        self.start(ScanKind::Full, files, frameworks, scoped, out);
    }

    fn start(
        &mut self,
        kind: ScanKind,
        files: BTreeSet<PathBuf>,
        frameworks: Vec<FrameworkId>,
        scoped: bool,
        out: &mut Vec<Directive>,
    ) {
        self.parsing_failed = false;
        self.last_scan += 1;
        let id = ScanId(self.last_scan);
        info!(scan = %id, ?kind, files = files.len(), frameworks = frameworks.len(), "starting scan");
        self.running = Some(RunningScan {
            id,
            kind,
            files: files.clone(),
        });
        out.push(Directive::StartScan(ScanPlan {
            id,
            kind,
            files,
            frameworks,
            scoped,
        }));
    }

    /// Cancel the running scan without treating it as finished.
    fn abort_running(&mut self, out: &mut Vec<Directive>) {
        if let Some(run) = self.running.take() {
            out.push(Directive::CancelScan { id: run.id });
        }
        if self.is_scanning() {
            self.state = ParserState::Idle;
        }
    }

    /// Cancel the running scan and process it as finished, replaying
    /// whatever was postponed.
    fn cancel_running(&mut self, outcome: ScanOutcome, now: Instant, out: &mut Vec<Directive>) {
        if let Some(run) = self.running.take() {
            out.push(Directive::CancelScan { id: run.id });
            self.finish(run, outcome, now, out);
        }
    }

    fn finish(&mut self, run: RunningScan, outcome: ScanOutcome, now: Instant, out: &mut Vec<Directive>) {
        if self.state == ParserState::Shutdown {
            return;
        }
        if outcome == ScanOutcome::Failed {
            self.parsing_failed = true;
        }
        debug!(scan = %run.id, ?outcome, "scan ended");
        self.state = ParserState::Idle;

        match run.kind {
            ScanKind::Partial => self.after_partial(now, out),
            ScanKind::Full => {
                self.dirty = self.parsing_failed;
                if self.pending != PendingUpdate::None || self.parsing_failed {
                    self.after_partial(now, out);
                } else {
                    out.push(Directive::Signal(ControllerSignal::ScanFinished));
                }
                self.dirty = false;
            }
        }
    }

    fn after_partial(&mut self, now: Instant, out: &mut Vec<Directive>) {
        match std::mem::take(&mut self.pending) {
            PendingUpdate::Full => self.update_now(now, out),
            PendingUpdate::Partial if self.buffer.is_timer_active() => {
                trace!("reparse timer running, it will pick up postponed files");
            }
            PendingUpdate::Partial if !self.buffer.is_empty() => {
                let files = self.buffer.files().clone();
                self.scan_for_tests(ScanRequest::Files(files), now, out);
            }
            PendingUpdate::Partial | PendingUpdate::None => self.report_completion(out),
        }
    }

    fn report_completion(&mut self, out: &mut Vec<Directive>) {
        self.dirty |= self.busy();
        if self.dirty {
            out.push(Directive::Signal(ControllerSignal::ScanFailed));
        } else if !self.update_timer.is_active() {
            out.push(Directive::Signal(ControllerSignal::ScanFinished));
        } else {
            trace!("update scheduled, not reporting completion");
        }
    }
}
