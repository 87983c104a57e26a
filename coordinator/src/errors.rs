use crate::config::ValidationError;
use thiserror::Error;

/// Errors raised at the coordinator's request boundary.
///
/// Upstream failures are not represented here: they are absorbed by the retry
/// policy and surface as an `ExecutionResult::UpstreamFailure` instead.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),

    #[error("Failed to build upstream client: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("Invalid config: {0}")]
    Config(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinatorError {
    /// Input errors are the caller's fault; everything else is ours.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CoordinatorError::InvalidRequest(_) | CoordinatorError::RequestBodyError(_)
        )
    }
}
