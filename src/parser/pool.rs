//! Bounded worker pool running framework parsers over a scan's files.
//!
//! One job per file is spawned on a dedicated rayon pool. Each job tries the
//! participating parsers in priority order and stops at the first one that
//! reports results. Results are streamed back over a crossbeam channel as
//! they are produced; the last job to finish releases the parsers and sends
//! [`PoolMessage::Finished`].

use super::controller::{ScanOutcome, ScanPlan};
use crate::core::{FrameworkId, ParseResult, ScanId};
use crate::errors::Result;
use crate::framework::{FrameworkParser, ScanContext};
use crate::observability::panic_hook::payload_message;
use crate::observability::{current_context, set_current_file, set_phase, ScanPhase};
use crate::project::ProjectSource;
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, trace, warn};

/// Message from pool threads to the engine thread.
#[derive(Debug)]
pub enum PoolMessage {
    ResultReady { scan: ScanId, result: ParseResult },
    Finished { scan: ScanId, outcome: ScanOutcome },
}

type Parsers = Vec<(FrameworkId, Arc<dyn FrameworkParser>)>;

/// Thread pool sized by the scan thread limit.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `thread_limit` threads (0 = automatic).
    pub fn new(thread_limit: usize) -> Result<Self> {
        let threads = crate::config::effective_thread_limit(thread_limit);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("testmap-scan-{i}"))
            .build()?;
        debug!(threads, "worker pool ready");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Start a scan. Returns immediately; progress arrives on `sender`.
    pub fn start(
        &self,
        plan: &ScanPlan,
        parsers: Parsers,
        project: Arc<dyn ProjectSource>,
        sender: Sender<PoolMessage>,
    ) -> ScanHandle {
        for (_, parser) in &parsers {
            parser.init(&plan.files, plan.kind == crate::core::ScanKind::Full);
        }

        let extensions: BTreeSet<String> = parsers
            .iter()
            .flat_map(|(_, parser)| parser.supported_extensions())
            .collect();
        let files: Vec<PathBuf> = plan
            .files
            .iter()
            .filter(|file| has_extension(file, &extensions) || project.is_indexed(file))
            .cloned()
            .collect();
        trace!(
            scan = %plan.id,
            candidates = plan.files.len(),
            selected = files.len(),
            "filtered scan files"
        );

        let canceled = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(Progress::new(files.len()));
        let job = Arc::new(ScanJob {
            scan: plan.id,
            ctx: ScanContext::new(plan.id, plan.kind, canceled.clone()),
            parsers,
            sender,
            progress: progress.clone(),
        });

        if files.is_empty() {
            job.complete();
        }
        for file in files {
            let job = job.clone();
            self.pool.spawn(move || {
                job.process(&file);
                if job.progress.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    job.complete();
                }
            });
        }

        ScanHandle {
            scan: plan.id,
            canceled,
            progress,
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}

fn has_extension(file: &Path, extensions: &BTreeSet<String>) -> bool {
    file.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(ext))
}

struct Progress {
    total: usize,
    processed: AtomicUsize,
    remaining: AtomicUsize,
    finished: Mutex<bool>,
    done: Condvar,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            processed: AtomicUsize::new(0),
            remaining: AtomicUsize::new(total),
            finished: Mutex::new(false),
            done: Condvar::new(),
        }
    }
}

struct ScanJob {
    scan: ScanId,
    ctx: ScanContext,
    parsers: Parsers,
    sender: Sender<PoolMessage>,
    progress: Arc<Progress>,
}

impl ScanJob {
    fn process(&self, file: &Path) {
        if !self.ctx.is_canceled() {
            let _span = debug_span!("parse_file", scan = %self.scan, file = %file.display()).entered();
            let _phase = set_phase(ScanPhase::Parsing);
            let _file = set_current_file(file);
            self.parse_file(file);
        }
        self.progress.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn parse_file(&self, file: &Path) {
        for (framework, parser) in &self.parsers {
            let attempt = catch_unwind(AssertUnwindSafe(|| parser.process_file(file, &self.ctx)));
            match attempt {
                Ok(Ok(results)) if results.is_empty() => continue,
                Ok(Ok(results)) => {
                    trace!(%framework, file = %file.display(), results = results.len(), "parsed");
                    for result in results {
                        if self.ctx.is_canceled() {
                            return;
                        }
                        let message = PoolMessage::ResultReady {
                            scan: self.scan,
                            result,
                        };
                        if self.sender.send(message).is_err() {
                            return;
                        }
                    }
                    return;
                }
                Ok(Err(err)) => {
                    warn!(%framework, error = %err, "parser failed, trying next framework");
                }
                Err(payload) => {
                    warn!(
                        %framework,
                        context = %current_context(),
                        panic = %payload_message(payload.as_ref()),
                        "parser panicked, skipping file"
                    );
                    return;
                }
            }
        }
    }

    fn complete(&self) {
        for (_, parser) in &self.parsers {
            parser.release();
        }
        let outcome = if self.ctx.is_canceled() {
            ScanOutcome::Canceled
        } else {
            ScanOutcome::Success
        };
        debug!(scan = %self.scan, ?outcome, "scan jobs done");
        // The engine may have gone away; nothing to report to then.
        let _ = self.sender.send(PoolMessage::Finished {
            scan: self.scan,
            outcome,
        });
        let mut finished = self.progress.finished.lock();
        *finished = true;
        self.progress.done.notify_all();
    }
}

/// Control over one running scan.
pub struct ScanHandle {
    scan: ScanId,
    canceled: Arc<AtomicBool>,
    progress: Arc<Progress>,
}

impl ScanHandle {
    pub fn scan(&self) -> ScanId {
        self.scan
    }

    /// Ask parsers to stop. Jobs not yet started are skipped.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Block until every job of the scan has returned.
    pub fn wait(&self) {
        let mut finished = self.progress.finished.lock();
        while !*finished {
            self.progress.done.wait(&mut finished);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound. Returns whether the
    /// scan finished in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.progress.finished.lock();
        while !*finished {
            if self.progress.done.wait_until(&mut finished, deadline).timed_out() {
                return *finished;
            }
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        *self.progress.finished.lock()
    }

    /// Files handled so far, including skipped ones.
    pub fn processed(&self) -> usize {
        self.progress.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.progress.total
    }
}

impl std::fmt::Debug for ScanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHandle")
            .field("scan", &self.scan)
            .field("canceled", &self.is_canceled())
            .field("processed", &self.processed())
            .field("total", &self.total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScanKind, TestKind};
    use crate::errors::ParseError;
    use crossbeam::channel::{unbounded, Receiver};

    struct Project;

    impl ProjectSource for Project {
        fn source_files(&self) -> Vec<PathBuf> {
            Vec::new()
        }

        fn is_known_file(&self, _path: &Path) -> bool {
            true
        }

        fn is_indexed(&self, path: &Path) -> bool {
            path.extension().is_some_and(|e| e == "h")
        }
    }

    /// Parser answering by file stem: `ok_*` yields one case, `err_*`
    /// fails, `panic_*` panics, `slow_*` blocks until the scan is canceled,
    /// anything else is not recognized.
    struct Scripted {
        id: &'static str,
        released: AtomicUsize,
    }

    impl Scripted {
        fn new(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                released: AtomicUsize::new(0),
            })
        }
    }

    impl FrameworkParser for Scripted {
        fn supported_extensions(&self) -> Vec<String> {
            vec!["cpp".to_string()]
        }

        fn process_file(&self, path: &Path, ctx: &ScanContext) -> std::result::Result<Vec<ParseResult>, ParseError> {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem.starts_with("ok_") {
                Ok(vec![ParseResult::new(self.id.into(), TestKind::Case, stem, path, 1)])
            } else if stem.starts_with("err_") {
                Err(ParseError::new(path, "broken"))
            } else if stem.starts_with("panic_") {
                panic!("parser bug");
            } else if stem.starts_with("slow_") {
                while !ctx.is_canceled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(Vec::new())
            } else {
                Ok(Vec::new())
            }
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Only recognizes files the first parser rejects with an error.
    struct Fallback;

    impl FrameworkParser for Fallback {
        fn supported_extensions(&self) -> Vec<String> {
            Vec::new()
        }

        fn process_file(&self, path: &Path, _ctx: &ScanContext) -> std::result::Result<Vec<ParseResult>, ParseError> {
            Ok(vec![ParseResult::new("B".into(), TestKind::Case, "fallback", path, 1)])
        }
    }

    fn entry(id: &str, parser: Arc<dyn FrameworkParser>) -> (FrameworkId, Arc<dyn FrameworkParser>) {
        (id.into(), parser)
    }

    fn plan(files: &[&str]) -> ScanPlan {
        ScanPlan {
            id: ScanId(7),
            kind: ScanKind::Full,
            files: files.iter().map(PathBuf::from).collect(),
            frameworks: vec!["A".into()],
            scoped: false,
        }
    }

    fn drain(rx: &Receiver<PoolMessage>) -> (Vec<ParseResult>, ScanOutcome) {
        let mut results = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                PoolMessage::ResultReady { scan, result } => {
                    assert_eq!(scan, ScanId(7));
                    results.push(result);
                }
                PoolMessage::Finished { outcome, .. } => return (results, outcome),
            }
        }
    }

    #[test]
    fn test_streams_results_then_finishes() {
        let pool = WorkerPool::new(2).unwrap();
        let parser = Scripted::new("A");
        let (tx, rx) = unbounded();
        let handle = pool.start(
            &plan(&["ok_a.cpp", "ok_b.cpp", "skip.cpp"]),
            vec![entry("A", parser.clone())],
            Arc::new(Project),
            tx,
        );

        let (results, outcome) = drain(&rx);
        assert_eq!(outcome, ScanOutcome::Success);
        let mut names: Vec<_> = results.iter().map(|r| r.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["ok_a", "ok_b"]);

        handle.wait();
        assert_eq!(handle.processed(), 3);
        assert_eq!(parser.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_extension_skipped_unless_indexed() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = unbounded();
        let handle = pool.start(
            &plan(&["ok_a.txt", "ok_b.h"]),
            vec![entry("A", Scripted::new("A"))],
            Arc::new(Project),
            tx,
        );
        let (results, _) = drain(&rx);
        assert_eq!(handle.total(), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "ok_b");
    }

    #[test]
    fn test_error_falls_through_to_next_parser() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = unbounded();
        pool.start(
            &plan(&["err_a.cpp"]),
            vec![entry("A", Scripted::new("A")), entry("B", Arc::new(Fallback))],
            Arc::new(Project),
            tx,
        );
        let (results, outcome) = drain(&rx);
        assert_eq!(outcome, ScanOutcome::Success);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "fallback");
    }

    #[test]
    fn test_panicking_parser_skips_file_only() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = unbounded();
        pool.start(
            &plan(&["panic_a.cpp", "ok_b.cpp"]),
            vec![entry("A", Scripted::new("A")), entry("B", Arc::new(Fallback))],
            Arc::new(Project),
            tx,
        );
        let (results, outcome) = drain(&rx);
        assert_eq!(outcome, ScanOutcome::Success);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "ok_b");
    }

    #[test]
    fn test_empty_scan_finishes_immediately() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = unbounded();
        let handle = pool.start(&plan(&[]), vec![entry("A", Scripted::new("A"))], Arc::new(Project), tx);
        assert!(handle.is_finished());
        let (results, outcome) = drain(&rx);
        assert!(results.is_empty());
        assert_eq!(outcome, ScanOutcome::Success);
    }

    #[test]
    fn test_canceled_scan_reports_canceled() {
        let pool = WorkerPool::new(1).unwrap();
        let files: Vec<String> = (0..200).map(|i| format!("slow_{i}.cpp")).collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let (tx, rx) = unbounded();
        let handle = pool.start(&plan(&refs), vec![entry("A", Scripted::new("A"))], Arc::new(Project), tx);
        handle.cancel();
        assert!(handle.wait_timeout(Duration::from_secs(10)));

        let (results, outcome) = drain(&rx);
        assert_eq!(outcome, ScanOutcome::Canceled);
        assert!(results.is_empty());
        assert_eq!(handle.processed(), 200);
    }
}
