//! Generational identity caches.
//!
//! Each cache maps a node's cache key to a remembered attribute (check
//! state, failed flag, expanded flag). Entries age by one generation per
//! [`IdentityCache::evolve`] and are evicted once they reach the maximum
//! generation without being read. Reading an entry makes it young again.

use crate::core::BaseType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default number of evolutions an unread entry survives.
pub const DEFAULT_MAX_GENERATION: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheEntry<T> {
    value: T,
    generation: u32,
    base_type: BaseType,
}

/// Key → (value, generation, base type) map with generational eviction.
#[derive(Debug, Clone)]
pub struct IdentityCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    max_generation: u32,
}

/// Serializable form of an [`IdentityCache`] for persistence by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct CacheSnapshot<T> {
    entries: BTreeMap<String, CacheEntry<T>>,
}

impl<T> Default for CacheSnapshot<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> CacheSnapshot<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for IdentityCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GENERATION)
    }
}

impl<T: Clone> IdentityCache<T> {
    pub fn new(max_generation: u32) -> Self {
        Self {
            entries: HashMap::new(),
            max_generation,
        }
    }

    /// Remember `value` for `key` as a fresh entry.
    pub fn insert(&mut self, key: impl Into<String>, value: T, base_type: BaseType) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                generation: 0,
                base_type,
            },
        );
    }

    /// Read the value for `key`, resetting its generation.
    pub fn get(&mut self, key: &str) -> Option<T> {
        self.entries.get_mut(key).map(|entry| {
            entry.generation = 0;
            entry.value.clone()
        })
    }

    /// Read without touching the generation.
    pub fn peek(&self, key: &str) -> Option<&T> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn generation(&self, key: &str) -> Option<u32> {
        self.entries.get(key).map(|entry| entry.generation)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Age entries of `mask` (all entries for `None`) by one generation.
    ///
    /// An entry already at the maximum generation is evicted instead.
    /// Returns the number of evicted entries.
    pub fn evolve(&mut self, mask: Option<BaseType>) -> usize {
        let before = self.entries.len();
        let max = self.max_generation;
        self.entries.retain(|_, entry| {
            if mask.is_some_and(|m| m != entry.base_type) {
                return true;
            }
            let keep = entry.generation < max;
            entry.generation += 1;
            keep
        });
        before - self.entries.len()
    }

    pub fn snapshot(&self) -> CacheSnapshot<T> {
        CacheSnapshot {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Replace the contents with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: CacheSnapshot<T>) {
        self.entries = snapshot.entries.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CheckState;

    #[test]
    fn test_unread_entry_evicted_after_max_generation() {
        let mut cache = IdentityCache::new(2);
        cache.insert("A:Foo::bar", CheckState::Unchecked, BaseType::Framework);

        assert_eq!(cache.evolve(None), 0);
        assert_eq!(cache.evolve(None), 0);
        assert_eq!(cache.generation("A:Foo::bar"), Some(2));
        assert_eq!(cache.evolve(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_resets_generation() {
        let mut cache = IdentityCache::new(1);
        cache.insert("k", true, BaseType::Framework);
        cache.evolve(None);
        assert_eq!(cache.get("k"), Some(true));
        assert_eq!(cache.generation("k"), Some(0));
        cache.evolve(None);
        assert!(cache.contains("k"));
    }

    #[test]
    fn test_evolve_respects_mask() {
        let mut cache = IdentityCache::new(0);
        cache.insert("fw", 1, BaseType::Framework);
        cache.insert("tool", 2, BaseType::Tool);

        assert_eq!(cache.evolve(Some(BaseType::Tool)), 1);
        assert!(cache.contains("fw"));
        assert!(!cache.contains("tool"));
    }

    #[test]
    fn test_snapshot_survives_serialization() {
        let mut cache = IdentityCache::default();
        cache.insert("A:Foo", CheckState::PartiallyChecked, BaseType::Framework);
        cache.evolve(None);

        let json = serde_json::to_string(&cache.snapshot()).unwrap();
        let snapshot: CacheSnapshot<CheckState> = serde_json::from_str(&json).unwrap();

        let mut restored = IdentityCache::default();
        restored.restore(snapshot);
        assert_eq!(restored.peek("A:Foo"), Some(&CheckState::PartiallyChecked));
        assert_eq!(restored.generation("A:Foo"), Some(1));
    }
}
