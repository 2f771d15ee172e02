use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use weft_core::error::Result;
use weft_core::traits::Step;
use weft_core::types::{StepContext, StepOutput};
use weft_tools::ToolRegistry;

const DEFAULT_TOOL: &str = "http_fetcher";

/// Delegates to the tool named by the `tool` parameter (default
/// `http_fetcher`), passing every step parameter as tool input.
pub struct FetchStep {
    tools: Arc<ToolRegistry>,
}

impl FetchStep {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

impl Step for FetchStep {
    fn type_name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Invoke a named tool (default http_fetcher) with the step parameters."
    }

    fn execute(
        &self,
        ctx: StepContext,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let tool = ctx
                .spec
                .param_str("tool")
                .unwrap_or_else(|| DEFAULT_TOOL.to_string());
            let input = serde_json::Value::Object(ctx.spec.parameters.clone());

            debug!(step_id = %ctx.spec.id, tool = %tool, "Delegating to tool");

            let result = self
                .tools
                .execute(&tool, input, ctx.tool_context(cancel))
                .await?;
            Ok(if result.is_error {
                StepOutput::failure(result.content)
            } else {
                StepOutput::success(result.content)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::error::WeftError;
    use weft_core::types::StepSpec;
    use weft_test_utils::MockTool;

    #[tokio::test]
    async fn test_fetch_uses_named_tool_with_parameters() {
        let mut tools = ToolRegistry::new();
        let tool = MockTool::new("custom", "{\"ok\":true}");
        let calls = tool.calls();
        tools.register(tool);
        let step = FetchStep::new(Arc::new(tools));

        let spec = StepSpec::new("f", "fetch")
            .with_param("tool", serde_json::json!("custom"))
            .with_param("url", serde_json::json!("http://example.test"));
        let out = step
            .execute(StepContext::new("r1", spec), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, StepOutput::success("{\"ok\":true}"));
        let input = calls.last_input().unwrap();
        assert_eq!(input["url"], "http://example.test");
        assert_eq!(input["tool"], "custom");
    }

    #[tokio::test]
    async fn test_fetch_defaults_to_http_fetcher() {
        let step = FetchStep::new(Arc::new(ToolRegistry::new()));
        let err = step
            .execute(
                StepContext::new("r1", StepSpec::new("f", "fetch")),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(&err, WeftError::ToolNotFound(name) if name == "http_fetcher"));
        assert!(err.is_resolution());
    }
}
