use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reserved result key for faults that escape the scheduler itself.
/// Never collides with a real step id because ids are user data and this
/// key is rejected at validation time.
pub const ORCHESTRATOR_RESULT_KEY: &str = "__orchestrator__";

/// One node in a graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    #[serde(default = "generate_id")]
    pub id: String,
    /// Step type, resolved against the step registry.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Opaque to the engine, passed through to the step.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Downstream step ids.
    #[serde(default)]
    pub next: Vec<String>,
    /// Per-attempt timeout override. `None` or `0` means engine default.
    #[serde(default, deserialize_with = "non_negative")]
    pub timeout_seconds: Option<u64>,
    /// Retry override. `None` (or negative on the wire) means engine default.
    #[serde(default, deserialize_with = "non_negative")]
    pub retry_count: Option<u32>,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            parameters: serde_json::Map::new(),
            next: vec![],
            timeout_seconds: None,
            retry_count: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_next(mut self, next: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.next = next.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = Some(retries);
        self
    }

    /// String view of a parameter; non-string JSON values are rendered.
    pub fn param_str(&self, key: &str) -> Option<String> {
        self.parameters.get(key).and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }
}

/// A run request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphSpec {
    /// Caller-supplied run id; generated when absent or empty.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default = "default_graph_name")]
    pub name: String,
    #[serde(default)]
    pub agents: Vec<StepSpec>,
}

impl GraphSpec {
    pub fn new(name: impl Into<String>, agents: Vec<StepSpec>) -> Self {
        Self {
            run_id: None,
            name: name.into(),
            agents,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

fn default_graph_name() -> String {
    "run".to_string()
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh run id.
pub fn new_run_id() -> String {
    generate_id()
}

fn non_negative<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|n| T::try_from(n).ok()))
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one step. Exactly one of `payload` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    /// Number of invocations made before this result was recorded.
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, payload: impl Into<String>, attempts: u32) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            payload: Some(payload.into()),
            error: None,
            executed_at: Utc::now(),
            attempts,
        }
    }

    pub fn failure(step_id: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            payload: None,
            error: Some(error.into()),
            executed_at: Utc::now(),
            attempts,
        }
    }
}

/// Point-in-time view of a run, as returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: String,
    pub name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub step_results: BTreeMap<String, StepResult>,
}

/// Execution context handed to a step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub spec: StepSpec,
    /// Successful upstream payloads keyed by predecessor step id.
    pub inputs: BTreeMap<String, String>,
    /// Keys of `inputs` in the order their steps are declared in the graph.
    pub input_order: Vec<String>,
}

impl StepContext {
    pub fn new(run_id: impl Into<String>, spec: StepSpec) -> Self {
        Self {
            run_id: run_id.into(),
            spec,
            inputs: BTreeMap::new(),
            input_order: Vec::new(),
        }
    }

    /// Add an upstream payload. Call in predecessor declaration order.
    pub fn with_input(mut self, step_id: impl Into<String>, payload: impl Into<String>) -> Self {
        let step_id = step_id.into();
        if self.inputs.insert(step_id.clone(), payload.into()).is_none() {
            self.input_order.push(step_id);
        }
        self
    }

    /// Payload of the earliest-declared predecessor that succeeded.
    pub fn first_input(&self) -> Option<&str> {
        self.input_order
            .iter()
            .find_map(|id| self.inputs.get(id))
            .map(String::as_str)
    }

    /// Build the context handed to a tool invoked on behalf of this step.
    pub fn tool_context(&self, cancel: CancellationToken) -> ToolContext {
        ToolContext {
            run_id: self.run_id.clone(),
            step_id: self.spec.id.clone(),
            cancel,
        }
    }
}

/// Value returned by a step that did not fault.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub content: String,
    pub is_error: bool,
}

impl StepOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool description exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub step_id: String,
    /// Cancelled when the calling attempt times out or the run is cancelled.
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Context for calls made outside any run (CLI, tests).
    pub fn detached() -> Self {
        Self {
            run_id: String::new(),
            step_id: String::new(),
            cancel: CancellationToken::new(),
        }
    }
}
