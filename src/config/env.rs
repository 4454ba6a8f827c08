use std::collections::HashMap;

use super::core::EngineConfig;

const PREFIX: &str = "TESTMAP_";

/// Environment variable snapshot for configuration resolution
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    /// Map of environment variable names to values
    pub vars: HashMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Create snapshot of current environment
    pub fn from_current_env() -> Self {
        let vars = std::env::vars()
            .filter(|(key, _)| key.starts_with(PREFIX))
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit pairs (tests, embedding hosts).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get environment variable value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Parse environment variable as type T
    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.trim().parse().ok()
    }

    /// Apply `TESTMAP_*` overrides on top of a loaded config (pure function).
    ///
    /// Unparsable values are ignored and logged.
    pub fn apply_to(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(limit) = self.parse_logged::<usize>("TESTMAP_THREAD_LIMIT") {
            config.scan.thread_limit = limit;
        }
        if let Some(ms) = self.parse_logged::<u64>("TESTMAP_UPDATE_DELAY_MS") {
            config.scan.update_delay_ms = ms;
        }
        if let Some(ms) = self.parse_logged::<u64>("TESTMAP_REPARSE_DELAY_MS") {
            config.scan.reparse_delay_ms = ms;
        }
        if let Some(generation) = self.parse_logged::<u32>("TESTMAP_CACHE_MAX_GENERATION") {
            config.cache.max_generation = generation;
        }
        config
    }

    fn parse_logged<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        let parsed = self.parse(key);
        if parsed.is_none() {
            tracing::warn!(key, value = raw, "ignoring unparsable environment override");
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let env = EnvironmentSnapshot::from_pairs([
            ("TESTMAP_THREAD_LIMIT", "2"),
            ("TESTMAP_REPARSE_DELAY_MS", "250"),
            ("TESTMAP_CACHE_MAX_GENERATION", "3"),
        ]);

        let config = env.apply_to(EngineConfig::default());

        assert_eq!(config.scan.thread_limit, 2);
        assert_eq!(config.scan.reparse_delay_ms, 250);
        assert_eq!(config.scan.update_delay_ms, 1000);
        assert_eq!(config.cache.max_generation, 3);
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let env = EnvironmentSnapshot::from_pairs([("TESTMAP_THREAD_LIMIT", "many")]);
        let config = env.apply_to(EngineConfig::default());
        assert_eq!(config.scan.thread_limit, 0);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let env = EnvironmentSnapshot::from_pairs([("TESTMAP_UPDATE_DELAY_MS", " 40 ")]);
        assert_eq!(env.parse::<u64>("TESTMAP_UPDATE_DELAY_MS"), Some(40));
    }
}
