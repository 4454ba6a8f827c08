//! Interfaces to the host's project model and semantic indexer.
//!
//! The engine never talks to a build system or an indexer directly. The host
//! implements [`ProjectSource`] and forwards indexer progress as
//! [`IndexerEvent`]s.

use std::path::{Path, PathBuf};

/// Read access to the project being scanned.
///
/// Implementations are called from the engine thread (`source_files`,
/// `is_known_file`, `is_parsing`) and from pool threads (`is_indexed`), so
/// they must be thread-safe.
pub trait ProjectSource: Send + Sync {
    /// Every source file of the project, used as the candidate set of a full scan.
    fn source_files(&self) -> Vec<PathBuf>;

    /// Whether `path` belongs to the project at all.
    fn is_known_file(&self, path: &Path) -> bool;

    /// Whether the indexer has semantic information for `path`.
    ///
    /// Files with an unsupported extension are still scanned when indexed.
    fn is_indexed(&self, _path: &Path) -> bool {
        false
    }

    /// Whether the project model itself is still loading.
    fn is_parsing(&self) -> bool {
        false
    }
}

/// Kind of background task reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Semantic re-indexing; the only kind the controller reacts to.
    Indexing,
    Other(String),
}

/// Progress phase of an indexer task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    Started,
    AllFinished,
}

/// Progress notification from the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerEvent {
    pub kind: TaskKind,
    pub phase: TaskPhase,
}

impl IndexerEvent {
    #[must_use]
    pub fn indexing_started() -> Self {
        Self {
            kind: TaskKind::Indexing,
            phase: TaskPhase::Started,
        }
    }

    #[must_use]
    pub fn indexing_finished() -> Self {
        Self {
            kind: TaskKind::Indexing,
            phase: TaskPhase::AllFinished,
        }
    }

    #[must_use]
    pub fn is_indexing(&self) -> bool {
        self.kind == TaskKind::Indexing
    }
}
