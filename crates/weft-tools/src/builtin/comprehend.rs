//! Key-phrase and sentiment tools backed by Amazon Comprehend.
//!
//! Both tools take `{"text": ..., "languageCode": "en"}`. A blank `text`
//! is answered with a `success: false` document without calling AWS.

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_comprehend::error::DisplayErrorContext;
use aws_sdk_comprehend::types::LanguageCode;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use weft_core::config::AwsConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolResult};

pub const KEYPHRASES_TOOL: &str = "aws_keyphrases_tool";
pub const SENTIMENT_TOOL: &str = "aws_sentiment_analysis_tool";

const DEFAULT_LANGUAGE: &str = "en";
const TEXT_REQUIRED: &str = "text field is required";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPhrase {
    pub text: String,
    pub score: f32,
    pub begin_offset: i32,
    pub end_offset: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SentimentScores {
    pub positive: f32,
    pub negative: f32,
    pub neutral: f32,
    pub mixed: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SentimentReport {
    /// `POSITIVE`, `NEGATIVE`, `NEUTRAL` or `MIXED`.
    pub sentiment: Option<String>,
    pub scores: Option<SentimentScores>,
}

/// Text-analytics backend used by the Comprehend tools.
pub trait TextAnalytics: Send + Sync + 'static {
    fn detect_key_phrases<'a>(
        &'a self,
        text: &'a str,
        language_code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<KeyPhrase>>>;

    fn detect_sentiment<'a>(
        &'a self,
        text: &'a str,
        language_code: &'a str,
    ) -> BoxFuture<'a, Result<SentimentReport>>;
}

/// Comprehend client, created on first use from the default credential
/// chain and the configured region.
pub struct AwsComprehend {
    region: String,
    client: OnceCell<aws_sdk_comprehend::Client>,
}

impl AwsComprehend {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            client: OnceCell::new(),
        }
    }

    pub fn from_config(config: &AwsConfig) -> Self {
        Self::new(config.region())
    }

    async fn client(&self) -> &aws_sdk_comprehend::Client {
        self.client
            .get_or_init(|| async {
                debug!(region = %self.region, "Loading AWS config for Comprehend");
                let config = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(self.region.clone()))
                    .load()
                    .await;
                aws_sdk_comprehend::Client::new(&config)
            })
            .await
    }
}

impl TextAnalytics for AwsComprehend {
    fn detect_key_phrases<'a>(
        &'a self,
        text: &'a str,
        language_code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<KeyPhrase>>> {
        Box::pin(async move {
            let resp = self
                .client()
                .await
                .detect_key_phrases()
                .text(text)
                .language_code(LanguageCode::from(language_code))
                .send()
                .await
                .map_err(|e| execution_error(KEYPHRASES_TOOL, DisplayErrorContext(&e)))?;

            Ok(resp
                .key_phrases()
                .iter()
                .map(|p| KeyPhrase {
                    text: p.text().unwrap_or_default().to_string(),
                    score: p.score().unwrap_or_default(),
                    begin_offset: p.begin_offset().unwrap_or_default(),
                    end_offset: p.end_offset().unwrap_or_default(),
                })
                .collect())
        })
    }

    fn detect_sentiment<'a>(
        &'a self,
        text: &'a str,
        language_code: &'a str,
    ) -> BoxFuture<'a, Result<SentimentReport>> {
        Box::pin(async move {
            let resp = self
                .client()
                .await
                .detect_sentiment()
                .text(text)
                .language_code(LanguageCode::from(language_code))
                .send()
                .await
                .map_err(|e| execution_error(SENTIMENT_TOOL, DisplayErrorContext(&e)))?;

            Ok(SentimentReport {
                sentiment: resp.sentiment().map(|s| s.as_str().to_string()),
                scores: resp.sentiment_score().map(|s| SentimentScores {
                    positive: s.positive().unwrap_or_default(),
                    negative: s.negative().unwrap_or_default(),
                    neutral: s.neutral().unwrap_or_default(),
                    mixed: s.mixed().unwrap_or_default(),
                }),
            })
        })
    }
}

#[derive(Deserialize)]
struct TextInput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "languageCode")]
    language_code: Option<String>,
}

/// `Ok(None)` when `text` is missing or blank.
fn parse_input(input: serde_json::Value) -> Result<Option<(String, String)>> {
    let params: TextInput =
        serde_json::from_value(input).map_err(|e| WeftError::ToolValidation(e.to_string()))?;
    let Some(text) = params.text.filter(|t| !t.trim().is_empty()) else {
        return Ok(None);
    };
    let language = params
        .language_code
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    Ok(Some((text, language)))
}

fn text_required() -> ToolResult {
    ToolResult::error(serde_json::json!({ "success": false, "error": TEXT_REQUIRED }).to_string())
}

fn execution_error(tool: &str, err: impl std::fmt::Display) -> WeftError {
    warn!(tool, error = %err, "Comprehend call failed");
    WeftError::ToolExecution {
        tool: tool.to_string(),
        message: err.to_string(),
    }
}

fn text_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "text": {
                "type": "string",
                "description": "Text to analyse"
            },
            "languageCode": {
                "type": "string",
                "description": "Comprehend language code, default \"en\""
            }
        },
        "required": ["text"]
    })
}

/// `aws_keyphrases_tool`.
pub struct KeyPhrasesTool {
    analytics: Arc<dyn TextAnalytics>,
    timeout_secs: u64,
}

impl KeyPhrasesTool {
    pub fn new(analytics: Arc<dyn TextAnalytics>, timeout_secs: u64) -> Self {
        Self {
            analytics,
            timeout_secs,
        }
    }
}

impl Tool for KeyPhrasesTool {
    fn name(&self) -> &str {
        KEYPHRASES_TOOL
    }

    fn description(&self) -> &str {
        "Extract key phrases from text with Amazon Comprehend."
    }

    fn input_schema(&self) -> serde_json::Value {
        text_schema()
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let Some((text, language)) = parse_input(input)? else {
                return Ok(text_required());
            };
            debug!(run_id = %ctx.run_id, step_id = %ctx.step_id, language = %language, "Detecting key phrases");

            let phrases = self.analytics.detect_key_phrases(&text, &language).await?;
            let output = serde_json::json!({
                "success": true,
                "count": phrases.len(),
                "keyPhrases": phrases,
            });
            Ok(ToolResult::success(output.to_string()))
        })
    }
}

/// `aws_sentiment_analysis_tool`.
pub struct SentimentTool {
    analytics: Arc<dyn TextAnalytics>,
    timeout_secs: u64,
}

impl SentimentTool {
    pub fn new(analytics: Arc<dyn TextAnalytics>, timeout_secs: u64) -> Self {
        Self {
            analytics,
            timeout_secs,
        }
    }
}

impl Tool for SentimentTool {
    fn name(&self) -> &str {
        SENTIMENT_TOOL
    }

    fn description(&self) -> &str {
        "Detect the sentiment of text with Amazon Comprehend."
    }

    fn input_schema(&self) -> serde_json::Value {
        text_schema()
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let Some((text, language)) = parse_input(input)? else {
                return Ok(text_required());
            };
            debug!(run_id = %ctx.run_id, step_id = %ctx.step_id, language = %language, "Detecting sentiment");

            let report = self.analytics.detect_sentiment(&text, &language).await?;
            // Missing scores read as zero; `raw` keeps them absent.
            let output = serde_json::json!({
                "success": true,
                "sentiment": report.sentiment,
                "sentimentScore": report.scores.clone().unwrap_or_default(),
                "raw": {
                    "Sentiment": report.sentiment,
                    "SentimentScore": report.scores,
                },
            });
            Ok(ToolResult::success(output.to_string()))
        })
    }
}
