use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Oracle not configured: {0}")]
    NotConfigured(String),

    #[error("Timeout")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OracleError {
    /// Transport-level failures are worth another attempt; a bad answer is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::RequestFailed(_) | OracleError::ServiceUnavailable(_) | OracleError::Timeout
        )
    }
}

pub type OracleResult<T> = Result<T, OracleError>;
