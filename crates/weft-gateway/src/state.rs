use std::sync::Arc;

use weft_core::config::GatewayConfig;
use weft_engine::RunSupervisor;
use weft_tools::ToolRegistry;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub supervisor: Arc<RunSupervisor>,
    pub tools: Arc<ToolRegistry>,
}
