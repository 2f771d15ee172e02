use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::event::{EngineEvent, EventBus};
use weft_core::run::RunRecord;
use weft_core::traits::RunStore;
use weft_core::types::{
    new_run_id, GraphSpec, RunSnapshot, RunStatus, StepResult, ORCHESTRATOR_RESULT_KEY,
};

use crate::scheduler::GraphScheduler;

/// Accepts graphs, caps the number of active runs and drives each run's
/// scheduler in the background.
pub struct RunSupervisor {
    store: Arc<dyn RunStore>,
    scheduler: Arc<GraphScheduler>,
    slots: Arc<Semaphore>,
    max_runs: usize,
    events: Option<Arc<EventBus>>,
}

impl RunSupervisor {
    /// The run cap comes from the scheduler's engine config.
    pub fn new(scheduler: GraphScheduler, store: Arc<dyn RunStore>) -> Self {
        let max_runs = scheduler.config().max_concurrent_runs.max(1);
        Self {
            store,
            scheduler: Arc::new(scheduler),
            slots: Arc::new(Semaphore::new(max_runs)),
            max_runs,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Reserve a run slot, store a new run record and start executing
    /// `graph` in the background. Returns the run id.
    ///
    /// Waits only for a free slot. A missing or blank `run_id` is
    /// generated; one already in the store is rejected with
    /// `DuplicateRun` and the slot is given back.
    pub async fn submit(&self, graph: GraphSpec) -> Result<String> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WeftError::Cancelled)?;

        let run_id = graph
            .run_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_run_id);
        let run = Arc::new(RunRecord::new(run_id.clone(), graph.name.clone()));
        if let Err(e) = self.store.add(run.clone()) {
            warn!(run_id = %run_id, error = %e, "Run rejected");
            return Err(e);
        }

        info!(run_id = %run_id, name = %graph.name, steps = graph.agents.len(), "Run submitted");
        emit(
            &self.events,
            EngineEvent::RunStarted {
                run_id: run_id.clone(),
                name: graph.name.clone(),
            },
        );

        let scheduler = self.scheduler.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            // Held until this task ends, on every path.
            let _permit = permit;

            let exec = {
                let run = run.clone();
                tokio::spawn(async move { scheduler.execute(&graph, &run).await })
            };
            let status = finalize(&run, exec.await);

            info!(run_id = %run.run_id(), status = %status, "Run finished");
            emit(
                &events,
                EngineEvent::RunFinished {
                    run_id: run.run_id().to_string(),
                    status,
                },
            );
        });

        Ok(run_id)
    }

    /// Snapshot of one run, or `None` for an unknown id.
    pub fn status(&self, run_id: &str) -> Option<RunSnapshot> {
        self.store.get(run_id).map(|run| run.snapshot())
    }

    /// Signal a run's cancellation. True if the run exists, whatever its
    /// state; a terminal run keeps its status.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(run) = self.store.get(run_id) else {
            return false;
        };
        run.request_cancel();
        info!(run_id = %run_id, status = %run.status(), "Run cancellation requested");
        true
    }

    /// Snapshots of every run, oldest first.
    pub fn list(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<RunSnapshot> = self.store.list().iter().map(|r| r.snapshot()).collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
        runs
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_runs
    }
}

fn emit(events: &Option<Arc<EventBus>>, event: EngineEvent) {
    if let Some(bus) = events {
        bus.publish(event);
    }
}

/// Map the scheduler's outcome onto the run's terminal status.
fn finalize(
    run: &RunRecord,
    outcome: std::result::Result<Result<()>, JoinError>,
) -> RunStatus {
    match outcome {
        Ok(Ok(())) if run.is_cancel_requested() => {
            run.finish(RunStatus::Cancelled, None);
        }
        Ok(Ok(())) => {
            run.finish(RunStatus::Completed, None);
        }
        Ok(Err(WeftError::Cancelled)) => {
            run.finish(RunStatus::Cancelled, None);
        }
        Ok(Err(e @ WeftError::InvalidGraph(_))) => {
            warn!(run_id = %run.run_id(), error = %e, "Run rejected by validation");
            run.finish(RunStatus::Failed, Some(e.to_string()));
        }
        Ok(Err(e)) => fault(run, e.to_string()),
        Err(e) => fault(run, format!("scheduler task failed: {}", e)),
    }
    run.status()
}

fn fault(run: &RunRecord, message: String) {
    error!(run_id = %run.run_id(), error = %message, "Run faulted");
    run.record_step(StepResult::failure(ORCHESTRATOR_RESULT_KEY, message.clone(), 0));
    run.finish(RunStatus::Failed, Some(message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use weft_core::config::EngineConfig;
    use weft_test_utils::{graph, DelayStep, ScriptedStep};

    use crate::registry::StepRegistry;
    use crate::store::InMemoryRunStore;

    fn supervisor(max_runs: usize) -> RunSupervisor {
        let mut registry = StepRegistry::new();
        registry.register(ScriptedStep::ok("good", "done"));
        registry.register(DelayStep::hanging("hang"));
        let config = EngineConfig {
            max_concurrent_runs: max_runs,
            retry_delay_ms: 1,
            ..EngineConfig::default()
        };
        RunSupervisor::new(
            GraphScheduler::new(Arc::new(registry), config),
            Arc::new(InMemoryRunStore::new()),
        )
    }

    async fn wait_terminal(sup: &RunSupervisor, run_id: &str) -> RunSnapshot {
        for _ in 0..500 {
            if let Some(snap) = sup.status(run_id) {
                if snap.status.is_terminal() {
                    return snap;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never finished", run_id);
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let sup = supervisor(2);
        let run_id = sup
            .submit(graph(&[("a", "good", &["b"]), ("b", "good", &[])]))
            .await
            .unwrap();

        let snap = wait_terminal(&sup, &run_id).await;
        assert_eq!(snap.status, RunStatus::Completed);
        assert!(snap.finished_at.is_some());
        assert_eq!(snap.step_results.len(), 2);
        assert_eq!(sup.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_stored_record_is_the_live_run() {
        let mut registry = StepRegistry::new();
        registry.register(ScriptedStep::ok("good", "done"));
        let store = Arc::new(InMemoryRunStore::new());
        let sup = RunSupervisor::new(
            GraphScheduler::new(Arc::new(registry), EngineConfig::default()),
            store.clone(),
        );

        let run_id = sup
            .submit(graph(&[("a", "good", &[])]).with_run_id("live"))
            .await
            .unwrap();
        let held = store.get(&run_id).unwrap();

        wait_terminal(&sup, &run_id).await;
        assert_eq!(held.status(), RunStatus::Completed);
        assert!(held.step_result("a").unwrap().success);
        assert!(Arc::ptr_eq(&held, &store.get(&run_id).unwrap()));
    }

    #[tokio::test]
    async fn test_blank_run_id_is_generated() {
        let sup = supervisor(1);
        let run_id = sup
            .submit(graph(&[("a", "good", &[])]).with_run_id("  "))
            .await
            .unwrap();
        assert!(!run_id.trim().is_empty());
        assert!(sup.status(&run_id).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_run_id_rejected_and_slot_released() {
        let sup = supervisor(2);
        let g = graph(&[("a", "hang", &[])]).with_run_id("fixed");
        sup.submit(g.clone()).await.unwrap();

        let err = sup.submit(g).await.unwrap_err();
        assert!(matches!(err, WeftError::DuplicateRun(id) if id == "fixed"));
        assert_eq!(sup.available_slots(), 1);

        assert!(sup.cancel("fixed"));
        wait_terminal(&sup, "fixed").await;
    }

    #[tokio::test]
    async fn test_concurrency_cap_blocks_extra_submit() {
        let sup = supervisor(1);
        let first = sup.submit(graph(&[("a", "hang", &[])])).await.unwrap();
        assert_eq!(sup.available_slots(), 0);

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), sup.submit(graph(&[("a", "good", &[])])))
                .await;
        assert!(blocked.is_err(), "second submit should wait for a slot");

        assert!(sup.cancel(&first));
        let second = tokio::time::timeout(Duration::from_secs(5), sup.submit(graph(&[("a", "good", &[])])))
            .await
            .expect("slot should free up after cancellation")
            .unwrap();
        assert_eq!(wait_terminal(&sup, &second).await.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_ends_cancelled() {
        let sup = supervisor(1);
        let run_id = sup
            .submit(graph(&[("a", "hang", &["b"]), ("b", "good", &[])]))
            .await
            .unwrap();

        assert!(sup.cancel(&run_id));
        assert!(sup.cancel(&run_id));
        assert!(!sup.cancel("unknown"));

        let snap = wait_terminal(&sup, &run_id).await;
        assert_eq!(snap.status, RunStatus::Cancelled);
        assert!(!snap.step_results.contains_key("b"));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_status() {
        let sup = supervisor(1);
        let run_id = sup.submit(graph(&[("a", "good", &[])])).await.unwrap();
        wait_terminal(&sup, &run_id).await;

        assert!(sup.cancel(&run_id));
        assert_eq!(sup.status(&run_id).unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_invalid_graph_fails_run() {
        let sup = supervisor(1);
        let run_id = sup
            .submit(graph(&[("a", "good", &["b"]), ("b", "good", &["a"])]))
            .await
            .unwrap();

        let snap = wait_terminal(&sup, &run_id).await;
        assert_eq!(snap.status, RunStatus::Failed);
        assert!(snap.error.unwrap().contains("cycle"));
        assert!(snap.step_results.is_empty());
        assert_eq!(sup.available_slots(), 1);
    }

    #[test]
    fn test_unexpected_fault_recorded_under_reserved_key() {
        let run = RunRecord::new("r1", "demo");
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let status = finalize(&run, Ok(Err(WeftError::Io(io))));

        assert_eq!(status, RunStatus::Failed);
        let fault = run.step_result(ORCHESTRATOR_RESULT_KEY).unwrap();
        assert!(!fault.success);
        assert!(fault.error.unwrap().contains("disk gone"));
    }

    #[test]
    fn test_signalled_run_finalizes_cancelled_even_on_normal_return() {
        let run = RunRecord::new("r1", "demo");
        run.request_cancel();
        assert_eq!(finalize(&run, Ok(Ok(()))), RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_list_returns_all_runs() {
        let sup = supervisor(2);
        let a = sup.submit(graph(&[("a", "good", &[])])).await.unwrap();
        let b = sup.submit(graph(&[("a", "good", &[])])).await.unwrap();
        wait_terminal(&sup, &a).await;
        wait_terminal(&sup, &b).await;

        let ids: Vec<String> = sup.list().into_iter().map(|s| s.run_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));
    }
}
