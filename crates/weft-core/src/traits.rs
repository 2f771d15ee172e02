use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::run::RunRecord;
use crate::types::*;

/// A named unit of work the scheduler dispatches by type.
pub trait Step: Send + Sync + 'static {
    /// Type name used in `StepSpec::step_type`.
    fn type_name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Execute one attempt.
    ///
    /// `cancel` fires when the attempt's deadline passes or the run is
    /// cancelled. Long waits should select on it.
    fn execute(
        &self,
        ctx: StepContext,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>>;
}

/// An external capability that steps delegate to by name.
pub trait Tool: Send + Sync + 'static {
    /// Tool name used for lookup.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Holds every submitted run, addressable by id.
pub trait RunStore: Send + Sync + 'static {
    /// Add a new run. Fails with `DuplicateRun` if the id is taken.
    fn add(&self, run: Arc<RunRecord>) -> Result<()>;

    /// Point lookup.
    fn get(&self, run_id: &str) -> Option<Arc<RunRecord>>;

    /// Overwrite the stored record for `run.run_id()`. Last writer wins.
    fn update(&self, run: Arc<RunRecord>);

    /// All runs, in no particular order.
    fn list(&self) -> Vec<Arc<RunRecord>>;
}
