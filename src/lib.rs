//! Incremental test discovery for IDE hosts.
//!
//! Framework parsers turn source files into [`ParseResult`]s; the
//! [`ParserController`](parser::ParserController) decides when and which
//! files to scan; the [`TreeReconciler`] merges results into a persistent
//! [`TestTree`] that keeps check, expand and failed state across rescans.
//! The [`Engine`] wires it all together.

// Export modules for library usage
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod framework;
pub mod observability;
pub mod parser;
pub mod project;
pub mod tree;

// Re-export commonly used types
pub use crate::config::{load_config, EngineConfig};
pub use crate::core::{
    BaseType, CheckState, FrameworkId, Location, ParseResult, ScanId, ScanKind, TestKind,
};
pub use crate::engine::{Engine, EngineCommand, EngineEvent};
pub use crate::errors::{ParseError, Result, TestmapError};
pub use crate::framework::{Framework, FrameworkParser, FrameworkRegistry, MatchPolicy, ScanContext};
pub use crate::parser::{ParserState, ScanOutcome};
pub use crate::project::{IndexerEvent, ProjectSource, TaskKind, TaskPhase};
pub use crate::tree::{Node, NodeId, TestTree, TreeReconciler};
