use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Engine-wide defaults. Per-step overrides take precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of runs that may execute at once.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Per-attempt timeout when a step sets none.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Retries after the first attempt when a step sets none.
    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,
    /// Constant delay between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Scale each delay by a random factor in 0.8..1.2.
    #[serde(default)]
    pub retry_jitter: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            step_timeout_secs: default_step_timeout_secs(),
            default_retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_jitter: false,
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_max_concurrent_runs() -> usize { 4 }
fn default_step_timeout_secs() -> u64 { 30 }
fn default_retry_count() -> u32 { 2 }
fn default_retry_delay_ms() -> u64 { 500 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// When set, API calls must carry `Authorization: Bearer <token>`.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Settings for the built-in `http_fetcher` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

fn default_user_agent() -> String {
    format!("weft/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout_secs() -> u64 { 30 }
fn default_max_snippet_chars() -> usize { 2000 }

/// Settings for the Comprehend-backed text-analysis tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,
    /// Per-call timeout for Comprehend requests.
    #[serde(default = "default_aws_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            timeout_secs: default_aws_timeout_secs(),
        }
    }
}

impl AwsConfig {
    /// Configured region, else `AWS_REGION`, else `us-east-1`.
    pub fn region(&self) -> String {
        self.region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| std::env::var("AWS_REGION").ok().filter(|r| !r.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string())
    }
}

pub const DEFAULT_AWS_REGION: &str = "us-east-1";

fn default_aws_timeout_secs() -> u64 { 30 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_runs == 0 {
            return Err(WeftError::Config(
                "engine.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.gateway.bind.trim().is_empty() {
            return Err(WeftError::Config("gateway.bind must not be empty".into()));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay verbatim
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.engine.max_concurrent_runs, 4);
        assert_eq!(config.engine.step_timeout_secs, 30);
        assert_eq!(config.engine.default_retry_count, 2);
        assert_eq!(config.engine.retry_delay_ms, 500);
        assert!(!config.engine.retry_jitter);
        assert_eq!(config.gateway.bind, "127.0.0.1:8080");
        assert!(config.gateway.token.is_none());
        assert_eq!(config.http.max_snippet_chars, 2000);
        assert!(config.aws.region.is_none());
        assert_eq!(config.aws.timeout_secs, 30);
    }

    #[test]
    fn test_aws_region_from_config_wins() {
        let config = AppConfig::parse("[aws]\nregion = \"eu-west-1\"\n").unwrap();
        assert_eq!(config.aws.region(), "eu-west-1");

        let blank = AwsConfig {
            region: Some("  ".into()),
            ..AwsConfig::default()
        };
        assert!(!blank.region().trim().is_empty());
    }

    #[test]
    fn test_partial_engine_section() {
        let config = AppConfig::parse(
            r#"
[engine]
max_concurrent_runs = 2
retry_delay_ms = 10
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_concurrent_runs, 2);
        assert_eq!(config.engine.retry_delay(), Duration::from_millis(10));
        assert_eq!(config.engine.step_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = AppConfig::parse("[engine]\nmax_concurrent_runs = 0\n").unwrap_err();
        assert!(matches!(err, WeftError::Config(_)));
    }
}
