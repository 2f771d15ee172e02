use crate::types::{RunStatus, StepResult};

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A run obtained its slot and started executing.
    RunStarted { run_id: String, name: String },
    /// One attempt of a step started.
    StepStarted {
        run_id: String,
        step_id: String,
        attempt: u32,
    },
    /// An attempt failed and the step will be retried.
    StepRetrying {
        run_id: String,
        step_id: String,
        attempt: u32,
        error: String,
    },
    /// A step recorded its terminal result.
    StepFinished { run_id: String, result: StepResult },
    /// A run reached a terminal status.
    RunFinished { run_id: String, status: RunStatus },
}

impl EngineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepRetrying { run_id, .. }
            | Self::StepFinished { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::RunFinished {
            run_id: "r1".into(),
            status: RunStatus::Completed,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), "r1");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::RunStarted {
            run_id: "r1".into(),
            name: "demo".into(),
        });
    }
}
