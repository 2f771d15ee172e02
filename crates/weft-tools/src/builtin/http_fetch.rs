use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::config::HttpConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolResult};

const TOOL_NAME: &str = "http_fetcher";

/// GET a URL and report status plus a truncated body snippet as JSON.
pub struct HttpFetcherTool {
    config: HttpConfig,
}

impl HttpFetcherTool {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct HttpFetchInput {
    #[serde(default)]
    url: Option<String>,
}

impl Tool for HttpFetcherTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Fetch a URL with HTTP GET. Returns status, reason and the first characters of the body."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.config.request_timeout_secs
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: HttpFetchInput = serde_json::from_value(input)
                .map_err(|e| WeftError::ToolValidation(e.to_string()))?;
            let url = params
                .url
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| WeftError::ToolValidation("url required".into()))?;

            debug!(url = %url, run_id = %ctx.run_id, step_id = %ctx.step_id, "Fetching URL");

            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(self.config.request_timeout_secs))
                .user_agent(self.config.user_agent.clone())
                .build()
                .map_err(|e| execution_error(format!("Failed to create HTTP client: {}", e)))?;

            let fetch = async {
                let resp = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| execution_error(format!("Request failed: {}", e)))?;
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .map_err(|e| execution_error(format!("Failed to read response body: {}", e)))?;
                Ok::<_, WeftError>((status, body))
            };

            let (status, body) = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(WeftError::Cancelled),
                res = fetch => res?,
            };

            let output = serde_json::json!({
                "url": url,
                "status": status.as_u16(),
                "reason": status.canonical_reason(),
                "success": status.is_success(),
                "contentSnippet": snippet(&body, self.config.max_snippet_chars),
            });

            Ok(ToolResult::success(output.to_string()))
        })
    }
}

fn execution_error(message: String) -> WeftError {
    WeftError::ToolExecution {
        tool: TOOL_NAME.to_string(),
        message,
    }
}

/// First `max_chars` characters of `body`.
fn snippet(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
