//! Execution engine: turns a graph of named steps into layer-by-layer
//! concurrent step invocations under a global cap on active runs.
//!
//! `RunSupervisor` is the entry point. It reserves a run slot, stores a
//! `RunRecord` and spawns the `GraphScheduler` in the background. The
//! scheduler validates the graph, then runs each topological layer
//! concurrently behind a barrier, applying per-step timeout and retry.

pub mod graph;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod steps;
pub mod store;
pub mod supervisor;

pub use graph::ExecutionPlan;
pub use registry::StepRegistry;
pub use retry::RetryPolicy;
pub use scheduler::GraphScheduler;
pub use store::InMemoryRunStore;
pub use supervisor::RunSupervisor;
