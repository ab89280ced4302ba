use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

/// Every variant is retryable by the caller on the next attempt.
#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("render timed out after {0}ms")]
    Timeout(u64),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser connection lost: {0}")]
    ConnectionLost(String),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl BrowserlessError {
    pub fn kind(&self) -> &'static str {
        match self {
            BrowserlessError::Timeout(_) => "timeout",
            BrowserlessError::Navigation(_) => "navigation",
            BrowserlessError::ConnectionLost(_) => "connection_lost",
            BrowserlessError::Endpoint(_) => "endpoint",
        }
    }
}
