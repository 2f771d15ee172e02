use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use weft_core::error::{Result, WeftError};
use weft_core::run::RunRecord;
use weft_core::traits::RunStore;

/// Process-local run store. Records are never evicted.
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<String, Arc<RunRecord>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, Arc<RunRecord>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore for InMemoryRunStore {
    fn add(&self, run: Arc<RunRecord>) -> Result<()> {
        let mut runs = self.runs();
        if runs.contains_key(run.run_id()) {
            return Err(WeftError::DuplicateRun(run.run_id().to_string()));
        }
        runs.insert(run.run_id().to_string(), run);
        Ok(())
    }

    fn get(&self, run_id: &str) -> Option<Arc<RunRecord>> {
        self.runs().get(run_id).cloned()
    }

    fn update(&self, run: Arc<RunRecord>) {
        self.runs().insert(run.run_id().to_string(), run);
    }

    fn list(&self) -> Vec<Arc<RunRecord>> {
        self.runs().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::{RunStatus, StepResult};

    #[test]
    fn test_add_and_get() {
        let store = InMemoryRunStore::new();
        store.add(Arc::new(RunRecord::new("r1", "demo"))).unwrap();
        let run = store.get("r1").unwrap();
        assert_eq!(run.run_id(), "r1");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let store = InMemoryRunStore::new();
        store.add(Arc::new(RunRecord::new("r1", "a"))).unwrap();
        let err = store.add(Arc::new(RunRecord::new("r1", "b"))).unwrap_err();
        assert!(matches!(err, WeftError::DuplicateRun(id) if id == "r1"));
        assert_eq!(store.get("r1").unwrap().name(), "a");
    }

    #[test]
    fn test_update_overwrites_whole_record() {
        let store = InMemoryRunStore::new();
        store.add(Arc::new(RunRecord::new("r1", "first"))).unwrap();
        store.update(Arc::new(RunRecord::new("r1", "second")));
        assert_eq!(store.get("r1").unwrap().name(), "second");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_concurrent_step_writes_on_same_record_are_all_kept() {
        let store = Arc::new(InMemoryRunStore::new());
        store.add(Arc::new(RunRecord::new("r1", "demo"))).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let run = store.get("r1").unwrap();
                    run.record_step(StepResult::success(format!("s{}", i), "ok", 1));
                    if i == 7 {
                        run.request_cancel();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let run = store.get("r1").unwrap();
        assert_eq!(run.step_results().len(), 16);
        assert_eq!(run.status(), RunStatus::Cancelling);
    }
}
