use super::{Framework, FrameworkParser};
use crate::config::FrameworkSettings;
use crate::core::FrameworkId;
use crate::errors::{Result, TestmapError};
use std::sync::Arc;

/// Priority-ordered set of registered frameworks.
///
/// Lookups and iteration always follow ascending priority, with registration
/// order breaking ties, so parsers are tried in a stable order.
#[derive(Debug, Clone, Default)]
pub struct FrameworkRegistry {
    frameworks: Vec<Framework>,
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a framework, replacing any existing one with the same id.
    pub fn register(&mut self, framework: Framework) {
        self.frameworks.retain(|f| f.id != framework.id);
        let pos = self
            .frameworks
            .iter()
            .position(|f| f.priority > framework.priority)
            .unwrap_or(self.frameworks.len());
        self.frameworks.insert(pos, framework);
    }

    #[must_use]
    pub fn with(mut self, framework: Framework) -> Self {
        self.register(framework);
        self
    }

    pub fn get(&self, id: &FrameworkId) -> Option<&Framework> {
        self.frameworks.iter().find(|f| &f.id == id)
    }

    pub fn require(&self, id: &FrameworkId) -> Result<&Framework> {
        self.get(id)
            .ok_or_else(|| TestmapError::UnknownFramework(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Framework> {
        self.frameworks.iter()
    }

    /// Active frameworks in priority order.
    pub fn active(&self) -> impl Iterator<Item = &Framework> {
        self.frameworks.iter().filter(|f| f.active)
    }

    #[must_use]
    pub fn active_ids(&self) -> Vec<FrameworkId> {
        self.active().map(|f| f.id.clone()).collect()
    }

    /// Parsers for the given frameworks, reordered by priority.
    #[must_use]
    pub fn parsers_for(&self, ids: &[FrameworkId]) -> Vec<(FrameworkId, Arc<dyn FrameworkParser>)> {
        self.frameworks
            .iter()
            .filter(|f| ids.contains(&f.id))
            .map(|f| (f.id.clone(), Arc::clone(f.parser())))
            .collect()
    }

    /// Apply user settings: activation and grouping per framework id.
    ///
    /// Frameworks not mentioned keep their current values. Unknown ids are
    /// reported back so the caller can log them.
    pub fn apply_settings(&mut self, settings: &[FrameworkSettings]) -> Vec<String> {
        let mut unknown = Vec::new();
        for setting in settings {
            match self
                .frameworks
                .iter_mut()
                .find(|f| f.id.as_str() == setting.id)
            {
                Some(framework) => {
                    framework.active = setting.active;
                    framework.grouping = setting.grouping;
                }
                None => unknown.push(setting.id.clone()),
            }
        }
        unknown
    }

    pub fn len(&self) -> usize {
        self.frameworks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frameworks.is_empty()
    }
}
