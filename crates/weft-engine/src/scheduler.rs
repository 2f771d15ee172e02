//! Layer-synchronous DAG scheduler.
//!
//! Kahn's algorithm drives execution: every step whose in-degree is zero
//! forms the current batch, the batch runs concurrently on the tokio pool,
//! and only after every step in it has a terminal result are successors
//! released into the next batch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::{EngineEvent, EventBus};
use weft_core::run::RunRecord;
use weft_core::traits::Step;
use weft_core::types::{GraphSpec, StepContext, StepResult, StepSpec};

use crate::graph::ExecutionPlan;
use crate::registry::StepRegistry;
use crate::retry::{step_timeout, RetryPolicy};

/// Error text recorded for steps aborted by run cancellation.
pub const CANCELLED_STEP_ERROR: &str = "cancelled";

/// Executes one graph against one run record.
pub struct GraphScheduler {
    steps: Arc<StepRegistry>,
    config: EngineConfig,
    events: Option<Arc<EventBus>>,
}

impl GraphScheduler {
    pub fn new(steps: Arc<StepRegistry>, config: EngineConfig) -> Self {
        Self {
            steps,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every layer of `graph`, writing step results into `run` as they
    /// complete.
    ///
    /// Returns `InvalidGraph` before any step runs if the graph is
    /// malformed, and `Cancelled` after the batch during which the run's
    /// token was signalled. Step failures never surface here; they are
    /// recorded as failed results and the run moves on.
    pub async fn execute(&self, graph: &GraphSpec, run: &Arc<RunRecord>) -> Result<()> {
        let plan = ExecutionPlan::build(graph)?;
        if plan.is_empty() {
            return Ok(());
        }

        let mut in_degree = plan.in_degrees();
        let mut ready: VecDeque<String> = plan.roots().into();
        if ready.is_empty() {
            return Err(WeftError::InvalidGraph(
                "no step is free of predecessors".into(),
            ));
        }

        let mut layer = 0usize;
        while !ready.is_empty() {
            let batch: Vec<String> = ready.drain(..).collect();
            debug!(run_id = %run.run_id(), layer, steps = batch.len(), "Dispatching layer");

            let tasks: Vec<_> = batch
                .iter()
                .filter_map(|id| plan.step(id))
                .map(|spec| {
                    let dispatch = self.dispatch(spec, &plan, run);
                    (spec.id.clone(), tokio::spawn(dispatch.run()))
                })
                .collect();

            let (ids, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
            for (step_id, joined) in ids.into_iter().zip(join_all(handles).await) {
                if let Err(e) = joined {
                    error!(run_id = %run.run_id(), step_id = %step_id, error = %e, "Step task aborted");
                    let result = StepResult::failure(&step_id, format!("step task failed: {}", e), 0);
                    run.record_step(result.clone());
                    self.emit(EngineEvent::StepFinished {
                        run_id: run.run_id().to_string(),
                        result,
                    });
                }
            }

            for id in &batch {
                for next in plan.successors(id) {
                    if let Some(deg) = in_degree.get_mut(next) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push_back(next.clone());
                        }
                    }
                }
            }

            if run.is_cancel_requested() {
                debug!(run_id = %run.run_id(), layer, "Cancellation observed after layer");
                return Err(WeftError::Cancelled);
            }
            layer += 1;
        }

        Ok(())
    }

    fn dispatch(&self, spec: &StepSpec, plan: &ExecutionPlan, run: &Arc<RunRecord>) -> StepDispatch {
        // Predecessors have all terminated by now; failed or missing ones
        // simply contribute nothing. Declaration order is kept.
        let context = plan
            .predecessors(&spec.id)
            .iter()
            .filter_map(|pred| run.successful_payload(pred).map(|p| (pred, p)))
            .fold(StepContext::new(run.run_id(), spec.clone()), |ctx, (pred, p)| {
                ctx.with_input(pred.as_str(), p)
            });

        StepDispatch {
            run: run.clone(),
            spec: spec.clone(),
            context,
            steps: self.steps.clone(),
            policy: RetryPolicy::for_step(spec, &self.config),
            timeout: step_timeout(spec, &self.config),
            events: self.events.clone(),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// Everything one step task needs, owned so it can be spawned.
struct StepDispatch {
    run: Arc<RunRecord>,
    spec: StepSpec,
    /// Template cloned for every attempt.
    context: StepContext,
    steps: Arc<StepRegistry>,
    policy: RetryPolicy,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl StepDispatch {
    /// Execute under the retry policy and record the terminal result.
    async fn run(self) {
        let result = self.execute_with_policy().await;
        debug!(
            run_id = %self.run.run_id(),
            step_id = %self.spec.id,
            success = result.success,
            attempts = result.attempts,
            "Step finished"
        );
        self.run.record_step(result.clone());
        self.emit(EngineEvent::StepFinished {
            run_id: self.run.run_id().to_string(),
            result,
        });
    }

    async fn execute_with_policy(&self) -> StepResult {
        let step_id = self.spec.id.as_str();
        let step = match self.steps.resolve(&self.spec.step_type) {
            Ok(step) => step,
            Err(e) => {
                error!(run_id = %self.run.run_id(), step_id, error = %e, "Step type unresolved");
                return StepResult::failure(step_id, e.to_string(), 0);
            }
        };

        let run_cancel = self.run.cancel_token().clone();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.emit(EngineEvent::StepStarted {
                run_id: self.run.run_id().to_string(),
                step_id: step_id.to_string(),
                attempt,
            });

            let err = match self.attempt(&step, &run_cancel).await {
                Ok(payload) => return StepResult::success(step_id, payload, attempt),
                Err(e) => e,
            };

            if run_cancel.is_cancelled() || matches!(err, WeftError::Cancelled) {
                debug!(run_id = %self.run.run_id(), step_id, attempt, "Step aborted by cancellation");
                return StepResult::failure(step_id, CANCELLED_STEP_ERROR, attempt);
            }

            if !err.is_retryable() || !self.policy.should_retry(attempt) {
                error!(
                    run_id = %self.run.run_id(),
                    step_id,
                    attempts = attempt,
                    error = %err,
                    "Step failed"
                );
                return StepResult::failure(step_id, err.to_string(), attempt);
            }

            let delay = self.policy.next_delay();
            warn!(
                run_id = %self.run.run_id(),
                step_id,
                attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying step"
            );
            self.emit(EngineEvent::StepRetrying {
                run_id: self.run.run_id().to_string(),
                step_id: step_id.to_string(),
                attempt,
                error: err.to_string(),
            });

            tokio::select! {
                biased;
                _ = run_cancel.cancelled() => {
                    return StepResult::failure(step_id, CANCELLED_STEP_ERROR, attempt);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One invocation under a deadline linked to the run's token. The
    /// attempt token is a child of the run token and is cancelled when the
    /// attempt ends, however it ends.
    async fn attempt(&self, step: &Arc<dyn Step>, run_cancel: &CancellationToken) -> Result<String> {
        let attempt_cancel = run_cancel.child_token();
        let _guard = attempt_cancel.clone().drop_guard();

        let ctx = self.context.clone();

        tokio::select! {
            biased;
            _ = run_cancel.cancelled() => Err(WeftError::Cancelled),
            res = tokio::time::timeout(self.timeout, step.execute(ctx, attempt_cancel.clone())) => {
                match res {
                    Ok(Ok(out)) if !out.is_error => Ok(out.content),
                    Ok(Ok(out)) => Err(WeftError::StepExecution {
                        step: self.spec.id.clone(),
                        message: out.content,
                    }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(WeftError::StepTimeout {
                        step: self.spec.id.clone(),
                        timeout_secs: self.timeout.as_secs(),
                    }),
                }
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
