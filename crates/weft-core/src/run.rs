use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::types::{RunSnapshot, RunStatus, StepResult};

/// Live state of one run.
///
/// Shared as `Arc<RunRecord>` between the run store, the scheduler's step
/// tasks and the supervisor. Status and step results sit behind separate
/// locks so a step-result write never contends with, or overwrites, a
/// concurrent status change.
pub struct RunRecord {
    run_id: String,
    name: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: Mutex<RunState>,
    results: Mutex<BTreeMap<String, StepResult>>,
}

struct RunState {
    status: RunStatus,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunRecord {
    /// Create a record in the `running` state with a fresh cancellation token.
    pub fn new(run_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            name: name.into(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            state: Mutex::new(RunState {
                status: RunStatus::Running,
                finished_at: None,
                error: None,
            }),
            results: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> RunStatus {
        lock(&self.state).status
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).finished_at
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.state).error.clone()
    }

    /// The run's cancellation token. Children derived from it observe
    /// run cancellation; cancelling a child never cancels the run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal cancellation. Moves a live run to `cancelling`; a terminal
    /// status is left as it is.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
        let mut state = lock(&self.state);
        if !state.status.is_terminal() {
            state.status = RunStatus::Cancelling;
        }
    }

    /// Set the final status. Only the first call takes effect.
    pub fn finish(&self, status: RunStatus, error: Option<String>) -> bool {
        let mut state = lock(&self.state);
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.finished_at = Some(Utc::now());
        if error.is_some() {
            state.error = error;
        }
        true
    }

    /// Insert or overwrite the result for one step.
    pub fn record_step(&self, result: StepResult) {
        lock(&self.results).insert(result.step_id.clone(), result);
    }

    pub fn step_result(&self, step_id: &str) -> Option<StepResult> {
        lock(&self.results).get(step_id).cloned()
    }

    /// Payload of a step that finished successfully.
    pub fn successful_payload(&self, step_id: &str) -> Option<String> {
        lock(&self.results)
            .get(step_id)
            .filter(|r| r.success)
            .and_then(|r| r.payload.clone())
    }

    pub fn step_results(&self) -> BTreeMap<String, StepResult> {
        lock(&self.results).clone()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let (status, finished_at, error) = {
            let state = lock(&self.state);
            (state.status, state.finished_at, state.error.clone())
        };
        RunSnapshot {
            run_id: self.run_id.clone(),
            name: self.name.clone(),
            status,
            started_at: self.started_at,
            finished_at,
            error,
            step_results: self.step_results(),
        }
    }
}

impl std::fmt::Debug for RunRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRecord")
            .field("run_id", &self.run_id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
