//! Error types for Datafy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatafyError>;

#[derive(Error, Debug)]
pub enum DatafyError {
    /// Model output could not be parsed or failed the intent schema.
    #[error("Classification error: {message}")]
    Classification { message: String, raw: String },

    #[error("Code generation failed: {0}")]
    CodeGeneration(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Text generation timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Text generation service returned {status}: {body}")]
    UpstreamService { status: u16, body: String },

    /// The fallback itself could not produce a well-formed result.
    #[error("Result shape error: {0}")]
    ResultShape(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid data format: {0}")]
    InvalidDataFormat(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl DatafyError {
    /// Timeouts are safe to retry as-is; a service error needs its status inspected first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatafyError::UpstreamTimeout(_))
    }

    /// Errors the fallback policy absorbs before anything reaches the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DatafyError::Classification { .. }
                | DatafyError::CodeGeneration(_)
                | DatafyError::Execution(_)
        )
    }
}

impl From<crate::llm_client::GenerationError> for DatafyError {
    fn from(err: crate::llm_client::GenerationError) -> Self {
        use crate::llm_client::GenerationError;

        match err {
            GenerationError::Timeout(after) => DatafyError::UpstreamTimeout(after),
            GenerationError::Status { status, body } => DatafyError::UpstreamService { status, body },
            other => DatafyError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::GenerationError;
    use std::time::Duration;

    #[test]
    fn test_generation_errors_keep_their_kind() {
        let timeout: DatafyError = GenerationError::Timeout(Duration::from_secs(120)).into();
        assert!(matches!(timeout, DatafyError::UpstreamTimeout(_)));
        assert!(timeout.is_retryable());

        let status: DatafyError = GenerationError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        assert!(matches!(status, DatafyError::UpstreamService { status: 502, .. }));
        assert!(!status.is_retryable());
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(DatafyError::Execution("boom".into()).is_recoverable());
        assert!(!DatafyError::ResultShape("empty".into()).is_recoverable());
        assert!(!DatafyError::Cancelled.is_recoverable());
    }
}
