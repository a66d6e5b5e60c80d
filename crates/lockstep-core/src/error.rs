use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A raw parameter string could not be converted to its declared type.
    #[error("Invalid value '{value}' for parameter '{param}' (expected {expected})")]
    InvalidParam {
        param: String,
        value: String,
        expected: String,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
