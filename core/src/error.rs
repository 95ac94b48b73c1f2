use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    #[error("invalid target: {0}")]
    Target(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
