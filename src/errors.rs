//! Error types for the discovery engine.
//!
//! Nothing in this crate is fatal to the host. Errors surface at the edges
//! (configuration loading, worker pool construction) and per file inside the
//! pool, where a [`ParseError`] is logged and the file is skipped.
//!
//! # Categories
//!
//! - `Config`: invalid or unreadable configuration
//! - `Io`: filesystem access outside of parsers
//! - `Pool`: the worker thread pool could not be built
//! - `UnknownFramework`: a request named a framework that is not registered
//!
//! # Example
//!
//! ```rust
//! use testmap::errors::{ParseError, TestmapError};
//!
//! let err = TestmapError::config("max_generation must be at least 1");
//! assert!(err.is_user_fixable());
//!
//! let parse = ParseError::new("src/a.cpp", "unterminated macro");
//! assert_eq!(parse.to_string(), "failed to parse src/a.cpp: unterminated macro");
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TestmapError>;

/// Errors reported by engine construction and configuration.
#[derive(Debug, Error)]
pub enum TestmapError {
    /// Configuration value out of range or file unparsable.
    #[error("configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Filesystem errors outside of parser calls.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// The bounded worker pool could not be created.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// A framework id was used that the registry does not know.
    #[error("unknown framework '{0}'")]
    UnknownFramework(String),
}

impl TestmapError {
    /// Create a configuration error without file context.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error tied to a config file.
    pub fn config_at(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Wrap an I/O error with the path it concerns.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Whether the user can fix this by editing settings or files.
    #[must_use]
    pub fn is_user_fixable(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::UnknownFramework(_))
    }
}

impl From<rayon::ThreadPoolBuildError> for TestmapError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// A failure confined to one file inside a framework parser.
///
/// Never aborts a scan: the pool logs it and the file's subtree is simply not
/// refreshed, so it stays marked and is collected by the next sweep.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to parse {}: {message}", .path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_user_fixable() {
        assert!(TestmapError::config("bad").is_user_fixable());
        assert!(TestmapError::UnknownFramework("gtest".into()).is_user_fixable());
        assert!(!TestmapError::Pool("no threads".into()).is_user_fixable());
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = TestmapError::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/tmp/x.toml",
        );
        match err {
            TestmapError::Io { path, .. } => assert_eq!(path, Some(PathBuf::from("/tmp/x.toml"))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("tests/tst_foo.cpp", "unexpected EOF");
        assert_eq!(
            err.to_string(),
            "failed to parse tests/tst_foo.cpp: unexpected EOF"
        );
    }
}
