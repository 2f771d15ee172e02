use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use weft_core::error::Result;
use weft_core::traits::Step;
use weft_core::types::{StepContext, StepOutput};

/// Succeeds with its own `text` parameter.
pub struct EchoStep;

impl Step for EchoStep {
    fn type_name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the `text` parameter unchanged."
    }

    fn execute(
        &self,
        ctx: StepContext,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        let text = ctx.spec.param_str("text").unwrap_or_default();
        Box::pin(async move { Ok(StepOutput::success(text)) })
    }
}
