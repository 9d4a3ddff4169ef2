use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Identity errors
    #[error("Invalid device path: {0}")]
    InvalidDevicePath(String),

    #[error("Invalid device class identifier: {0}")]
    InvalidClassId(String),

    // Record decoding errors
    #[error("Invalid {record} record: {message}")]
    InvalidRecord {
        record: &'static str,
        message: String,
    },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new invalid record error.
    pub fn invalid_record(record: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            record,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
