use std::collections::HashMap;
use std::sync::Arc;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Step;
use weft_tools::ToolRegistry;

use crate::steps::{EchoStep, FetchStep, KeyPhrasesStep, SentimentStep};

/// Registry of step implementations keyed by type name.
/// Lookup ignores ASCII case.
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Register a step type, replacing any with the same name.
    pub fn register(&mut self, step: impl Step) {
        let name = step.type_name().to_ascii_lowercase();
        self.steps.insert(name, Arc::new(step));
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(&type_name.to_ascii_lowercase()).cloned()
    }

    /// Resolve a step type or fail with `StepTypeNotFound`.
    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn Step>> {
        self.get(type_name)
            .ok_or_else(|| WeftError::StepTypeNotFound(type_name.to_string()))
    }

    /// Registered type names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .steps
            .values()
            .map(|s| s.type_name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Create a registry with the built-in step types. Steps that delegate
    /// to capabilities resolve them from `tools` at execution time.
    pub fn with_builtins(tools: Arc<ToolRegistry>) -> Self {
        let mut registry = Self::new();
        registry.register(EchoStep);
        registry.register(FetchStep::new(tools.clone()));
        registry.register(KeyPhrasesStep::new(tools.clone()));
        registry.register(SentimentStep::new(tools));
        registry
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
