//! Steps backed by external text-analytics capabilities.
//!
//! The capabilities (`aws_keyphrases_tool`, `aws_sentiment_analysis_tool`)
//! come from the tool registry; a missing one is a resolution error and is
//! not retried.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Step;
use weft_core::types::{StepContext, StepOutput, ToolResult};
use weft_tools::ToolRegistry;

pub use weft_tools::builtin::comprehend::{KEYPHRASES_TOOL, SENTIMENT_TOOL};

/// Key-phrase extraction over the `text` parameter or upstream content.
pub struct KeyPhrasesStep {
    tools: Arc<ToolRegistry>,
}

impl KeyPhrasesStep {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

impl Step for KeyPhrasesStep {
    fn type_name(&self) -> &str {
        "aws_keyphrases"
    }

    fn description(&self) -> &str {
        "Extract key phrases from `text`, or from the first upstream payload."
    }

    fn execute(
        &self,
        ctx: StepContext,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let Some(text) = source_text(&ctx) else {
                return Ok(StepOutput::failure(
                    "No text provided in parameters or upstream inputs",
                ));
            };

            let mut input = serde_json::Map::new();
            input.insert("text".into(), serde_json::Value::String(text));
            if let Some(lang) = ctx.spec.param_str("languageCode") {
                input.insert("languageCode".into(), serde_json::Value::String(lang));
            }

            let result = invoke(
                &self.tools,
                KEYPHRASES_TOOL,
                serde_json::Value::Object(input),
                &ctx,
                cancel,
            )
            .await?;
            Ok(into_output(result))
        })
    }
}

/// Sentiment detection; the step parameters are the tool input.
pub struct SentimentStep {
    tools: Arc<ToolRegistry>,
}

impl SentimentStep {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

impl Step for SentimentStep {
    fn type_name(&self) -> &str {
        "aws_sentiment_analysis"
    }

    fn description(&self) -> &str {
        "Detect sentiment of the `text` parameter."
    }

    fn execute(
        &self,
        ctx: StepContext,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let input = serde_json::Value::Object(ctx.spec.parameters.clone());
            let result = invoke(&self.tools, SENTIMENT_TOOL, input, &ctx, cancel).await?;
            Ok(into_output(result))
        })
    }
}

async fn invoke(
    tools: &ToolRegistry,
    name: &str,
    input: serde_json::Value,
    ctx: &StepContext,
    cancel: CancellationToken,
) -> Result<ToolResult> {
    if tools.get(name).is_none() {
        return Err(WeftError::ToolNotFound(name.to_string()));
    }
    tools.execute(name, input, ctx.tool_context(cancel)).await
}

fn into_output(result: ToolResult) -> StepOutput {
    if result.is_error {
        StepOutput::failure(result.content)
    } else {
        StepOutput::success(result.content)
    }
}

/// The `text` parameter if non-blank, else text pulled from the
/// earliest-declared successful predecessor: its `contentSnippet` or `content` field when it is a
/// JSON object carrying one, the raw payload otherwise.
fn source_text(ctx: &StepContext) -> Option<String> {
    if let Some(text) = ctx.spec.param_str("text").filter(|t| !t.trim().is_empty()) {
        return Some(text);
    }

    let first = ctx.first_input()?;
    if first.trim().is_empty() {
        return None;
    }

    let extracted = serde_json::from_str::<serde_json::Value>(first)
        .ok()
        .and_then(|doc| {
            ["contentSnippet", "content"]
                .iter()
                .find_map(|key| doc.get(key).and_then(|v| v.as_str()).map(str::to_string))
        });

    Some(extracted.unwrap_or_else(|| first.to_string()))
        .filter(|t| !t.trim().is_empty())
}
