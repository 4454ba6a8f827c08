use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use super::core::EngineConfig;
use super::env::EnvironmentSnapshot;
use super::validation::validate_config;
use crate::errors::{Result, TestmapError};

/// Name of the per-project configuration file.
pub const CONFIG_FILE_NAME: &str = ".testmap.toml";

const MAX_TRAVERSAL_DEPTH: usize = 10;

/// Pure function to read config file contents
pub(crate) fn read_config_file(path: &Path) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Pure function to parse and validate config from TOML string
pub fn parse_and_validate_config(contents: &str) -> Result<EngineConfig> {
    let config = toml::from_str::<EngineConfig>(contents)
        .map_err(|e| TestmapError::config(format!("failed to parse {CONFIG_FILE_NAME}: {e}")))?;

    validate_config(&config).map_err(|errors| TestmapError::config(errors.join("; ")))?;
    Ok(config)
}

/// Load and validate one config file.
pub fn load_config_from(path: &Path) -> anyhow::Result<EngineConfig> {
    let contents = read_config_file(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = parse_and_validate_config(&contents)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

/// Pure function to try loading config from a specific path
fn try_load_config_from_path(config_path: &Path) -> Option<EngineConfig> {
    match load_config_from(config_path) {
        Ok(config) => {
            debug!(path = %config_path.display(), "loaded config");
            Some(config)
        }
        Err(e) => {
            handle_load_error(config_path, &e);
            None
        }
    }
}

/// Only log actual errors, not "file not found"
fn handle_load_error(config_path: &Path, error: &anyhow::Error) {
    let not_found = error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
    if !not_found {
        warn!(path = %config_path.display(), error = format!("{error:#}"), "ignoring config file");
    }
}

/// Pure function to generate directory ancestors up to a depth limit
pub fn directory_ancestors(start: PathBuf, max_depth: usize) -> impl Iterator<Item = PathBuf> {
    std::iter::successors(Some(start), |dir| {
        let mut parent = dir.clone();
        if parent.pop() {
            Some(parent)
        } else {
            None
        }
    })
    .take(max_depth)
}

/// Search `start` and its ancestors for a config file, then apply `env`.
pub fn load_config_in(start: &Path, env: &EnvironmentSnapshot) -> EngineConfig {
    let config = directory_ancestors(start.to_path_buf(), MAX_TRAVERSAL_DEPTH)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find_map(|path| try_load_config_from_path(&path))
        .unwrap_or_else(|| {
            debug!(
                depth = MAX_TRAVERSAL_DEPTH,
                "no config found, using defaults"
            );
            EngineConfig::default()
        });
    env.apply_to(config)
}

/// Load config for the current working directory and process environment.
pub fn load_config() -> EngineConfig {
    let env = EnvironmentSnapshot::from_current_env();
    match std::env::current_dir() {
        Ok(dir) => load_config_in(&dir, &env),
        Err(e) => {
            warn!(error = %e, "failed to get current directory, using default config");
            env.apply_to(EngineConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_ancestors_stops_at_depth() {
        let dirs: Vec<_> = directory_ancestors(PathBuf::from("/a/b/c/d"), 2).collect();
        assert_eq!(dirs, vec![PathBuf::from("/a/b/c/d"), PathBuf::from("/a/b/c")]);
    }

    #[test]
    fn test_directory_ancestors_reaches_root() {
        let dirs: Vec<_> = directory_ancestors(PathBuf::from("/a"), 10).collect();
        assert_eq!(dirs, vec![PathBuf::from("/a"), PathBuf::from("/")]);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let err = parse_and_validate_config("[cache]\nmax_generation = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_generation"));
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(parse_and_validate_config("[scan\n").is_err());
    }
}
