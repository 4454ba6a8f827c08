//! Configuration validation with error accumulation.
//!
//! All problems are collected before reporting so a user sees every issue in
//! one pass instead of fixing them one at a time.

use std::collections::HashSet;

use super::core::EngineConfig;

/// Validate a config, returning every problem found.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<String>> {
    let errors: Vec<String> = [
        validate_cache(config),
        validate_frameworks(config),
    ]
    .into_iter()
    .flatten()
    .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_cache(config: &EngineConfig) -> Vec<String> {
    if config.cache.max_generation == 0 {
        vec!["cache.max_generation must be at least 1".to_string()]
    } else {
        Vec::new()
    }
}

fn validate_frameworks(config: &EngineConfig) -> Vec<String> {
    let mut seen = HashSet::new();
    config
        .frameworks
        .iter()
        .filter_map(|fw| {
            if fw.id.trim().is_empty() {
                Some("frameworks: id must not be empty".to_string())
            } else if !seen.insert(fw.id.as_str()) {
                Some(format!("frameworks: duplicate id '{}'", fw.id))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameworkSettings;

    fn framework(id: &str) -> FrameworkSettings {
        FrameworkSettings {
            id: id.to_string(),
            active: true,
            grouping: false,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_accumulates_all_errors() {
        let mut config = EngineConfig::default();
        config.cache.max_generation = 0;
        config.frameworks = vec![framework("qtest"), framework("qtest"), framework(" ")];

        let errors = validate_config(&config).unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("max_generation"));
        assert!(errors[1].contains("duplicate id 'qtest'"));
        assert!(errors[2].contains("must not be empty"));
    }
}
