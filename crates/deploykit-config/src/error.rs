//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Every missing required variable, reported together so the operator
    /// fixes the file once.
    #[error("missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("env file error: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
