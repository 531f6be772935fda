//! Error types for the adapter.

use thiserror::Error;

/// Main error type for the adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Configuration errors (invalid YAML, bad values, shaping that fails to compile)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup errors (listener failed to bind)
    #[error("Startup error: {0}")]
    Startup(String),

    /// Transport errors (broken pipe, server failure)
    #[error("Transport error: {0}")]
    Transport(String),

    /// `OpenAPI` errors (spec loading, index building)
    #[error(transparent)]
    OpenApi(#[from] restbridge_openapi::error::OpenApiToolsError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
