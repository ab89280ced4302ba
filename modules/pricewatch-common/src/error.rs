use thiserror::Error;

pub type Result<T> = std::result::Result<T, PriceWatchError>;

#[derive(Error, Debug)]
pub enum PriceWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<std::io::Error> for PriceWatchError {
    fn from(e: std::io::Error) -> Self {
        PriceWatchError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for PriceWatchError {
    fn from(e: serde_json::Error) -> Self {
        PriceWatchError::Store(e.to_string())
    }
}
