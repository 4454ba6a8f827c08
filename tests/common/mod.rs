// Test utility module for testmap integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testmap::config::{EngineConfig, FrameworkSettings};
use testmap::{
    Framework, FrameworkId, FrameworkParser, FrameworkRegistry, ParseError, ParseResult,
    ProjectSource, ScanContext, TestKind, TestTree,
};

/// Generous bound for waiting on background scans.
pub const SETTLE: Duration = Duration::from_secs(10);

/// In-memory project model.
#[derive(Default)]
pub struct MemoryProject {
    files: Mutex<Vec<PathBuf>>,
    indexed: Mutex<BTreeSet<PathBuf>>,
    parsing: Mutex<bool>,
}

impl MemoryProject {
    pub fn new<I, P>(files: I) -> Arc<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let project = Self::default();
        *project.files.lock() = files.into_iter().map(Into::into).collect();
        Arc::new(project)
    }

    pub fn add_file(&self, file: impl Into<PathBuf>) {
        self.files.lock().push(file.into());
    }

    pub fn remove_file(&self, file: &Path) {
        self.files.lock().retain(|f| f != file);
    }

    pub fn mark_indexed(&self, file: impl Into<PathBuf>) {
        self.indexed.lock().insert(file.into());
    }

    pub fn set_parsing(&self, parsing: bool) {
        *self.parsing.lock() = parsing;
    }
}

impl ProjectSource for MemoryProject {
    fn source_files(&self) -> Vec<PathBuf> {
        self.files.lock().clone()
    }

    fn is_known_file(&self, path: &Path) -> bool {
        self.files.lock().iter().any(|f| f == path)
    }

    fn is_indexed(&self, path: &Path) -> bool {
        self.indexed.lock().contains(path)
    }

    fn is_parsing(&self) -> bool {
        *self.parsing.lock()
    }
}

enum Script {
    Results(Vec<ParseResult>),
    Fail(String),
}

/// Framework parser replaying per-file scripted answers.
///
/// Files without a script are not recognized.
pub struct ScriptedParser {
    id: FrameworkId,
    scripts: Mutex<HashMap<PathBuf, Script>>,
    calls: AtomicUsize,
    inits: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedParser {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: FrameworkId::new(id),
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            inits: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, file: impl Into<PathBuf>, results: Vec<ParseResult>) {
        self.scripts
            .lock()
            .insert(file.into(), Script::Results(results));
    }

    pub fn fail(&self, file: impl Into<PathBuf>, message: &str) {
        self.scripts
            .lock()
            .insert(file.into(), Script::Fail(message.to_string()));
    }

    pub fn forget(&self, file: &Path) {
        self.scripts.lock().remove(file);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl FrameworkParser for ScriptedParser {
    fn supported_extensions(&self) -> Vec<String> {
        vec!["cpp".to_string(), "h".to_string()]
    }

    fn init(&self, _files: &BTreeSet<PathBuf>, _full_scan: bool) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn process_file(&self, path: &Path, _ctx: &ScanContext) -> Result<Vec<ParseResult>, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().get(path) {
            Some(Script::Results(results)) => Ok(results.clone()),
            Some(Script::Fail(message)) => Err(ParseError::new(path, message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// A test case with one function per entry of `functions`.
pub fn case(framework: &str, name: &str, file: &str, functions: &[&str]) -> ParseResult {
    let id = FrameworkId::new(framework);
    ParseResult::new(id.clone(), TestKind::Case, name, file, 1).with_children(
        functions
            .iter()
            .enumerate()
            .map(|(i, f)| ParseResult::new(id.clone(), TestKind::Function, *f, file, 10 + i as u32)),
    )
}

/// Registry with one framework per scripted parser, in priority order.
pub fn registry(parsers: &[&Arc<ScriptedParser>]) -> FrameworkRegistry {
    parsers
        .iter()
        .enumerate()
        .fold(FrameworkRegistry::new(), |registry, (i, parser)| {
            let id = parser.id.clone();
            let parser: Arc<dyn FrameworkParser> = Arc::<ScriptedParser>::clone(parser);
            registry.with(Framework::new(id, i as u32 + 1, parser))
        })
}

/// Config with short timers so tests settle quickly.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scan.thread_limit = 2;
    config.scan.update_delay_ms = 5;
    config.scan.reparse_delay_ms = 5;
    config
}

pub fn framework_settings(id: &str, active: bool, grouping: bool) -> FrameworkSettings {
    FrameworkSettings {
        id: id.to_string(),
        active,
        grouping,
    }
}

/// Cache keys of every non-root node.
pub fn cache_keys(tree: &TestTree) -> BTreeSet<String> {
    tree.iter()
        .filter(|(_, node)| node.kind() != TestKind::Root)
        .map(|(_, node)| node.cache_key().to_string())
        .collect()
}
