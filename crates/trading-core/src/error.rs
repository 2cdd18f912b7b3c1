use thiserror::Error;

/// Error taxonomy shared by every component of the agent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradingError {
    /// Malformed or inconsistent candle data. The cycle is skipped.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Exchange or oracle unreachable. Retried with backoff, then degraded.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Rejected credentials. Never retried; the process must stop.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl TradingError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TradingError::Authentication(_))
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::Connectivity(_) | TradingError::InvalidResponse(_)
        )
    }
}

pub type TradingResult<T> = Result<T, TradingError>;
