//! The discovery engine: one object owning the controller, the worker pool
//! and the test tree.
//!
//! All mutation happens on the thread calling into [`Engine`]. Hosts either
//! call the methods directly and [`Engine::pump`] regularly, or hand the
//! engine to a thread running [`Engine::run`] and talk to it through
//! [`EngineCommand`]s. Tree consumers subscribe to [`EngineEvent`]s.

use crate::config::{validate_config, EngineConfig, FrameworkSettings};
use crate::core::{BaseType, CheckState, FrameworkId, ScanId, ScanKind};
use crate::errors::{Result, TestmapError};
use crate::framework::FrameworkRegistry;
use crate::observability::{set_phase, ScanPhase};
use crate::parser::{
    ControllerSignal, Directive, ParserController, ParserState, PoolMessage, ScanHandle,
    ScanOutcome, ScanPlan, WorkerPool,
};
use crate::project::{IndexerEvent, ProjectSource};
use crate::tree::{CacheSnapshots, NodeId, TestTree, TreeReconciler};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, trace, warn};

/// Upper bound on a [`Engine::run`] wait when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Notification for tree consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Nodes were added, removed or changed.
    TreeChanged,
    ScanStarted {
        scan: ScanId,
        kind: ScanKind,
        files: usize,
    },
    /// Scanning settled and stale nodes were swept.
    ScanFinished,
    /// Scanning was interrupted; stale nodes are kept until the retry.
    ScanFailed,
}

/// Request for an engine running inside [`Engine::run`].
#[derive(Debug, Clone)]
pub enum EngineCommand {
    RequestUpdate(Option<FrameworkId>),
    FileChanged(PathBuf),
    SetState(ParserState),
    Indexer(IndexerEvent),
    ProjectChanged,
    ProjectPartsUpdated,
    SetFrameworks(Vec<FrameworkSettings>),
    SetCheckState(NodeId, CheckState),
    SetExpanded(NodeId, bool),
    MarkFailed(NodeId, bool),
    /// Final shutdown; `run` returns afterwards.
    Shutdown,
}

struct ActiveScan {
    id: ScanId,
    handle: ScanHandle,
}

/// Test discovery engine.
pub struct Engine {
    config: EngineConfig,
    registry: FrameworkRegistry,
    project: Arc<dyn ProjectSource>,
    controller: ParserController,
    reconciler: TreeReconciler,
    pool: Option<WorkerPool>,
    active: Option<ActiveScan>,
    sender: Sender<PoolMessage>,
    receiver: Receiver<PoolMessage>,
    subscribers: Vec<Sender<EngineEvent>>,
    tree_changed: bool,
}

impl Engine {
    /// Build an engine and schedule the initial full scan.
    pub fn new(
        config: EngineConfig,
        mut registry: FrameworkRegistry,
        project: Arc<dyn ProjectSource>,
    ) -> Result<Self> {
        validate_config(&config).map_err(|errors| TestmapError::config(errors.join("; ")))?;
        for unknown in registry.apply_settings(&config.frameworks) {
            warn!(framework = %unknown, "settings name an unregistered framework");
        }

        let mut reconciler = TreeReconciler::new(config.cache.max_generation);
        reconciler.sync_frameworks(&registry);
        let controller = ParserController::new(project.clone(), &config.scan);
        let (sender, receiver) = channel::unbounded();

        let mut engine = Self {
            config,
            registry,
            project,
            controller,
            reconciler,
            pool: None,
            active: None,
            sender,
            receiver,
            subscribers: Vec::new(),
            tree_changed: false,
        };
        let directives = engine
            .controller
            .sync_frameworks(engine.registry.active_ids(), Instant::now());
        engine.execute(directives);
        info!(
            frameworks = engine.registry.active().count(),
            "test discovery engine ready"
        );
        Ok(engine)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FrameworkRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &TestTree {
        self.reconciler.tree()
    }

    pub fn reconciler(&self) -> &TreeReconciler {
        &self.reconciler
    }

    pub fn controller(&self) -> &ParserController {
        &self.controller
    }

    pub fn state(&self) -> ParserState {
        self.controller.state()
    }

    /// `(processed, total)` file counts of the running scan.
    pub fn scan_progress(&self) -> Option<(usize, usize)> {
        self.active
            .as_ref()
            .map(|scan| (scan.handle.processed(), scan.handle.total()))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.controller.next_deadline()
    }

    /// Schedule a debounced full rescan, optionally limited to one framework.
    ///
    /// A named framework must be registered.
    pub fn request_update(&mut self, framework: Option<FrameworkId>) -> Result<()> {
        if let Some(id) = &framework {
            self.registry.require(id)?;
        }
        self.controller.request_update(framework, Instant::now());
        Ok(())
    }

    pub fn notify_file_changed(&mut self, path: &Path) {
        let directives = self.controller.notify_file_changed(path, Instant::now());
        self.execute(directives);
    }

    pub fn set_state(&mut self, state: ParserState) {
        let directives = self.controller.set_state(state, Instant::now());
        self.execute(directives);
    }

    /// Cancel and drain the running scan; `final_shutdown` makes it terminal.
    pub fn about_to_shutdown(&mut self, final_shutdown: bool) {
        let directives = self.controller.about_to_shutdown(final_shutdown);
        self.execute(directives);
    }

    pub fn on_indexer_event(&mut self, event: &IndexerEvent) {
        let directives = self.controller.on_indexer_event(event, Instant::now());
        self.execute(directives);
    }

    pub fn on_project_changed(&mut self) {
        let directives = self.controller.on_project_changed(Instant::now());
        self.execute(directives);
    }

    pub fn on_project_parts_updated(&mut self) {
        self.controller.on_project_parts_updated(Instant::now());
    }

    /// Apply new per-framework settings (activation, grouping).
    pub fn set_frameworks(&mut self, settings: &[FrameworkSettings]) {
        for unknown in self.registry.apply_settings(settings) {
            warn!(framework = %unknown, "settings name an unregistered framework");
        }
        self.tree_changed |= self.reconciler.sync_frameworks(&self.registry);
        let directives = self
            .controller
            .sync_frameworks(self.registry.active_ids(), Instant::now());
        self.execute(directives);
    }

    pub fn set_check_state(&mut self, id: NodeId, state: CheckState) -> bool {
        let changed = self.reconciler.set_check_state(id, state);
        self.tree_changed |= changed;
        self.flush_tree_changed();
        changed
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> bool {
        self.reconciler.set_expanded(id, expanded)
    }

    pub fn mark_failed(&mut self, id: NodeId, failed: bool) -> bool {
        let changed = self.reconciler.mark_failed(id, failed);
        self.tree_changed |= changed;
        self.flush_tree_changed();
        changed
    }

    pub fn clear_failed_marks(&mut self) -> bool {
        let changed = self.reconciler.clear_failed_marks();
        self.tree_changed |= changed;
        self.flush_tree_changed();
        changed
    }

    pub fn cache_snapshots(&self) -> CacheSnapshots {
        self.reconciler.cache_snapshots()
    }

    pub fn restore_caches(&mut self, snapshots: CacheSnapshots) {
        self.reconciler.restore_caches(snapshots);
    }

    /// Fire due timers.
    pub fn tick(&mut self) {
        let directives = self.controller.tick(Instant::now());
        self.execute(directives);
    }

    /// Apply every queued pool message and fire due timers without blocking.
    ///
    /// Returns the number of messages handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.process_message(message);
            handled += 1;
        }
        self.tick();
        self.flush_tree_changed();
        handled
    }

    /// Block until no scan is running and no timer is pending, or `timeout`
    /// elapses. Returns whether the engine settled.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.active.is_none() && self.controller.next_deadline().is_none() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wake = self
                .controller
                .next_deadline()
                .map_or(deadline, |due| due.min(deadline));
            match self.receiver.recv_timeout(wake.saturating_duration_since(now)) {
                Ok(message) => self.process_message(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Serve `commands` until a [`EngineCommand::Shutdown`] arrives or every
    /// command sender is dropped.
    pub fn run(&mut self, commands: &Receiver<EngineCommand>) {
        let pool_messages = self.receiver.clone();
        loop {
            let wait = self
                .controller
                .next_deadline()
                .map_or(IDLE_WAIT, |due| due.saturating_duration_since(Instant::now()));
            channel::select! {
                recv(commands) -> command => match command {
                    Ok(EngineCommand::Shutdown) | Err(_) => {
                        self.about_to_shutdown(true);
                        return;
                    }
                    Ok(command) => self.handle_command(command),
                },
                recv(pool_messages) -> message => {
                    if let Ok(message) = message {
                        self.process_message(message);
                    }
                },
                default(wait) => {}
            }
            self.tick();
            self.flush_tree_changed();
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        trace!(?command, "engine command");
        match command {
            EngineCommand::RequestUpdate(framework) => {
                if let Err(err) = self.request_update(framework) {
                    warn!(error = %err, "ignoring update request");
                }
            }
            EngineCommand::FileChanged(path) => self.notify_file_changed(&path),
            EngineCommand::SetState(state) => self.set_state(state),
            EngineCommand::Indexer(event) => self.on_indexer_event(&event),
            EngineCommand::ProjectChanged => self.on_project_changed(),
            EngineCommand::ProjectPartsUpdated => self.on_project_parts_updated(),
            EngineCommand::SetFrameworks(settings) => self.set_frameworks(&settings),
            EngineCommand::SetCheckState(id, state) => {
                self.set_check_state(id, state);
            }
            EngineCommand::SetExpanded(id, expanded) => {
                self.set_expanded(id, expanded);
            }
            EngineCommand::MarkFailed(id, failed) => {
                self.mark_failed(id, failed);
            }
            EngineCommand::Shutdown => self.about_to_shutdown(true),
        }
    }

    /// Apply one message from the worker pool. Messages of any scan other
    /// than the running one are discarded.
    pub fn process_message(&mut self, message: PoolMessage) {
        let running = self.active.as_ref().map(|scan| scan.id);
        match message {
            PoolMessage::ResultReady { scan, result } if Some(scan) == running => {
                let _phase = set_phase(ScanPhase::Reconciling);
                self.tree_changed |= self.reconciler.reconcile(&result);
            }
            PoolMessage::Finished { scan, outcome } if Some(scan) == running => {
                self.active = None;
                let directives = self
                    .controller
                    .on_scan_finished(scan, outcome, Instant::now());
                self.execute(directives);
            }
            PoolMessage::ResultReady { scan, .. } | PoolMessage::Finished { scan, .. } => {
                trace!(%scan, "discarding message of stale scan");
            }
        }
    }

    fn execute(&mut self, directives: Vec<Directive>) {
        let mut queue: VecDeque<Directive> = directives.into();
        while let Some(directive) = queue.pop_front() {
            match directive {
                Directive::StartScan(plan) => {
                    if let Err(err) = self.start_scan(&plan) {
                        warn!(scan = %plan.id, error = %err, "could not start scan");
                        queue.extend(self.controller.on_scan_finished(
                            plan.id,
                            ScanOutcome::Failed,
                            Instant::now(),
                        ));
                    }
                }
                Directive::CancelScan { id } => self.cancel_scan(id),
                Directive::ResetTree => {
                    self.tree_changed |= self.reconciler.remove_all_items();
                    self.reconciler.clear_caches();
                }
                Directive::Signal(ControllerSignal::ScanFinished) => {
                    let _phase = set_phase(ScanPhase::Sweeping);
                    self.tree_changed |= self.reconciler.sweep();
                    self.flush_tree_changed();
                    self.emit(EngineEvent::ScanFinished);
                }
                Directive::Signal(ControllerSignal::ScanFailed) => {
                    self.flush_tree_changed();
                    self.emit(EngineEvent::ScanFailed);
                }
            }
        }
        self.flush_tree_changed();
    }

    fn start_scan(&mut self, plan: &ScanPlan) -> Result<()> {
        let _span = debug_span!("scan", scan = %plan.id, kind = ?plan.kind).entered();
        let _phase = set_phase(ScanPhase::Planning);

        if self.pool.is_none() {
            self.pool = Some(WorkerPool::new(self.config.scan.thread_limit)?);
        }
        let Some(pool) = self.pool.as_ref() else {
            return Err(TestmapError::Pool("worker pool unavailable".to_string()));
        };

        self.reconciler.refresh_caches(Some(BaseType::Framework));
        match plan.kind {
            ScanKind::Full => self.reconciler.mark_all_for_removal(&plan.frameworks),
            ScanKind::Partial => self
                .reconciler
                .mark_files_for_removal(&plan.files, &plan.frameworks),
        }

        let parsers = self.registry.parsers_for(&plan.frameworks);
        let handle = pool.start(plan, parsers, self.project.clone(), self.sender.clone());
        debug!(files = handle.total(), "scan dispatched");
        self.emit(EngineEvent::ScanStarted {
            scan: plan.id,
            kind: plan.kind,
            files: handle.total(),
        });
        self.active = Some(ActiveScan {
            id: plan.id,
            handle,
        });
        Ok(())
    }

    /// Stop the scan and wait for in-flight parser calls to return.
    fn cancel_scan(&mut self, id: ScanId) {
        match self.active.take() {
            Some(scan) if scan.id == id => {
                debug!(scan = %id, "canceling scan");
                scan.handle.cancel();
                scan.handle.wait();
            }
            other => self.active = other,
        }
    }

    fn flush_tree_changed(&mut self) {
        if std::mem::take(&mut self.tree_changed) {
            self.emit(EngineEvent::TreeChanged);
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(scan) = self.active.take() {
            scan.handle.cancel();
            scan.handle.wait();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.controller.state())
            .field("running", &self.active.as_ref().map(|scan| scan.id))
            .field("nodes", &self.reconciler.tree().len())
            .finish_non_exhaustive()
    }
}
