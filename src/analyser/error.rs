use thiserror::Error;

/// Failure modes of the analysis pipeline.
///
/// All of these are recoverable at the batch level: the offending
/// protocol or file is skipped with a warning and processing continues.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The hierarchy or conversation text did not match the expected grammar.
    #[error("malformed report: {0}")]
    MalformedReport(String),

    /// tshark returned a non-zero exit; stderr is kept for diagnosis.
    #[error("tshark invocation failed ({status}): {stderr}")]
    ToolInvocation { status: i32, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
