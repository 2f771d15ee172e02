use std::collections::HashMap;
use std::sync::Arc;

use weft_core::config::AppConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools. Lookup ignores ASCII case.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_ascii_lowercase();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_ascii_lowercase()).cloned()
    }

    /// List registered tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values().map(|t| t.name().to_string()).collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name under its own timeout and the caller's
    /// cancellation token.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| WeftError::ToolNotFound(name.to_string()))?;

        let timeout_secs = tool.timeout_secs();
        let timeout = std::time::Duration::from_secs(timeout_secs);
        let cancel = ctx.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WeftError::Cancelled),
            res = tokio::time::timeout(timeout, tool.execute(input, ctx)) => match res {
                Ok(result) => result,
                Err(_) => Err(WeftError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs,
                }),
            },
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins(config: &AppConfig) -> Self {
        use crate::builtin::{AwsComprehend, HttpFetcherTool, KeyPhrasesTool, SentimentTool};

        let mut registry = Self::new();
        registry.register(HttpFetcherTool::new(config.http.clone()));

        // One lazily built Comprehend client serves both tools.
        let comprehend = Arc::new(AwsComprehend::from_config(&config.aws));
        let timeout = config.aws.timeout_secs;
        registry.register(KeyPhrasesTool::new(comprehend.clone(), timeout));
        registry.register(SentimentTool::new(comprehend, timeout));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
