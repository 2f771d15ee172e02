//! Scripted steps and tools for exercising the engine in tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{Step, Tool};
use weft_core::types::{GraphSpec, StepContext, StepOutput, StepSpec, ToolContext, ToolResult};

/// Shared record of tool invocations.
#[derive(Clone, Default)]
pub struct ToolCalls(Arc<Mutex<Vec<serde_json::Value>>>);

impl ToolCalls {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn last_input(&self) -> Option<serde_json::Value> {
        self.0.lock().unwrap().last().cloned()
    }

    fn push(&self, input: serde_json::Value) {
        self.0.lock().unwrap().push(input);
    }
}

/// Tool that returns a fixed result and records its inputs.
pub struct MockTool {
    name: String,
    outcome: std::result::Result<String, String>,
    calls: ToolCalls,
}

impl MockTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(output.into()),
            calls: ToolCalls::default(),
        }
    }

    /// A tool whose every call faults with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Err(message.into()),
            calls: ToolCalls::default(),
        }
    }

    pub fn calls(&self) -> ToolCalls {
        self.calls.clone()
    }
}

impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool for tests"
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.push(input);
        let outcome = match &self.outcome {
            Ok(out) => Ok(ToolResult::success(out.clone())),
            Err(msg) => Err(WeftError::ToolExecution {
                tool: self.name.clone(),
                message: msg.clone(),
            }),
        };
        Box::pin(async move { outcome })
    }
}

/// Tool that sleeps for `delay` unless cancelled first.
pub struct SlowTool {
    name: String,
    delay: Duration,
    timeout_secs: u64,
}

impl SlowTool {
    pub fn new(name: impl Into<String>, delay: Duration, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            delay,
            timeout_secs,
        }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Slow mock tool for tests"
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(WeftError::Cancelled),
                _ = tokio::time::sleep(self.delay) => Ok(ToolResult::success("slow done")),
            }
        })
    }
}

/// Shared record of step invocations.
#[derive(Clone, Default)]
pub struct StepCalls {
    contexts: Arc<Mutex<Vec<StepContext>>>,
}

impl StepCalls {
    pub fn count(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    /// Contexts received, in invocation order.
    pub fn contexts(&self) -> Vec<StepContext> {
        self.contexts.lock().unwrap().clone()
    }

    /// Contexts received for one step id.
    pub fn for_step(&self, step_id: &str) -> Vec<StepContext> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.spec.id == step_id)
            .cloned()
            .collect()
    }

    fn push(&self, ctx: &StepContext) -> u32 {
        let mut contexts = self.contexts.lock().unwrap();
        contexts.push(ctx.clone());
        contexts.iter().filter(|c| c.spec.id == ctx.spec.id).count() as u32
    }
}

type Behavior = dyn Fn(&StepContext, u32) -> Result<StepOutput> + Send + Sync;

/// Step whose outcome is computed by a closure from the context and the
/// 1-based attempt number for that step id.
pub struct ScriptedStep {
    type_name: String,
    behavior: Box<Behavior>,
    calls: StepCalls,
}

impl ScriptedStep {
    pub fn new(
        type_name: impl Into<String>,
        behavior: impl Fn(&StepContext, u32) -> Result<StepOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            behavior: Box::new(behavior),
            calls: StepCalls::default(),
        }
    }

    /// Always succeeds with `payload`.
    pub fn ok(type_name: impl Into<String>, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self::new(type_name, move |_, _| Ok(StepOutput::success(payload.clone())))
    }

    /// Always faults with a step execution error.
    pub fn failing(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(type_name, move |ctx, _| {
            Err(WeftError::StepExecution {
                step: ctx.spec.id.clone(),
                message: message.clone(),
            })
        })
    }

    /// Always returns a non-success output without faulting.
    pub fn returning_failure(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(type_name, move |_, _| Ok(StepOutput::failure(message.clone())))
    }

    /// Faults on the first `failures` attempts, then succeeds with `payload`.
    pub fn flaky(type_name: impl Into<String>, failures: u32, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self::new(type_name, move |ctx, attempt| {
            if attempt <= failures {
                Err(WeftError::StepExecution {
                    step: ctx.spec.id.clone(),
                    message: format!("transient failure {}", attempt),
                })
            } else {
                Ok(StepOutput::success(payload.clone()))
            }
        })
    }

    /// Succeeds with the step's upstream inputs rendered as a JSON object.
    pub fn echo_inputs(type_name: impl Into<String>) -> Self {
        Self::new(type_name, |ctx, _| {
            let inputs = serde_json::to_string(&ctx.inputs)?;
            Ok(StepOutput::success(inputs))
        })
    }

    pub fn calls(&self) -> StepCalls {
        self.calls.clone()
    }
}

impl Step for ScriptedStep {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn execute(
        &self,
        ctx: StepContext,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        let attempt = self.calls.push(&ctx);
        let outcome = (self.behavior)(&ctx, attempt);
        Box::pin(async move { outcome })
    }
}

/// Step that sleeps for `delay` (or until cancelled) and then succeeds
/// with its step id. Tracks how many attempts saw cancellation.
pub struct DelayStep {
    type_name: String,
    delay: Duration,
    calls: StepCalls,
    cancelled: Arc<AtomicU32>,
}

impl DelayStep {
    pub fn new(type_name: impl Into<String>, delay: Duration) -> Self {
        Self {
            type_name: type_name.into(),
            delay,
            calls: StepCalls::default(),
            cancelled: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A step that only ends when its attempt is cancelled.
    pub fn hanging(type_name: impl Into<String>) -> Self {
        Self::new(type_name, Duration::from_secs(24 * 60 * 60))
    }

    pub fn calls(&self) -> StepCalls {
        self.calls.clone()
    }

    pub fn cancelled_attempts(&self) -> Arc<AtomicU32> {
        self.cancelled.clone()
    }
}

impl Step for DelayStep {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn execute(
        &self,
        ctx: StepContext,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        self.calls.push(&ctx);
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    Err(WeftError::Cancelled)
                }
                _ = tokio::time::sleep(self.delay) => Ok(StepOutput::success(ctx.spec.id.clone())),
            }
        })
    }
}

/// Step that panics, for exercising task-fault handling.
pub struct PanicStep {
    type_name: String,
}

impl PanicStep {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl Step for PanicStep {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn execute(
        &self,
        ctx: StepContext,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        panic!("step {} exploded", ctx.spec.id)
    }
}

/// Build a graph from `(id, type, next)` triples.
pub fn graph(nodes: &[(&str, &str, &[&str])]) -> GraphSpec {
    let agents = nodes
        .iter()
        .map(|(id, ty, next)| StepSpec::new(*id, *ty).with_next(next.iter().copied()))
        .collect();
    GraphSpec::new("test", agents)
}
