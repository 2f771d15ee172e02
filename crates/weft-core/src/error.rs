use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Resolution errors
    #[error("Step type not registered: {0}")]
    StepTypeNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    // Tool errors
    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Step errors
    #[error("Step failed: {step}: {message}")]
    StepExecution { step: String, message: String },

    #[error("Step timeout after {timeout_secs}s: {step}")]
    StepTimeout { step: String, timeout_secs: u64 },

    // Graph / run errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Run already exists: {0}")]
    DuplicateRun(String),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Resolution failures cannot succeed on a later attempt.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::StepTypeNotFound(_) | Self::ToolNotFound(_))
    }

    /// Whether the retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_resolution() && !matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
