//! Error types for `restbridge-openapi`.

use restbridge_http::client::InvalidHeader;
use thiserror::Error;

/// Main error type for index building, request building, and auth binding.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (identifier collisions, unusable documents).
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OpenAPI` errors (unresolvable `$ref`, unsupported constructs).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    OpenApiSpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    OpenApiSpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Parameter collision within one operation.
    #[error("Parameter collision: {0}")]
    ParamCollision(String),

    /// No operation matches the requested tool name.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing required {location} parameter: {name}")]
    MissingParameter { name: String, location: String },

    #[error("No base URL: the document declares no servers")]
    MissingBaseUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    InvalidHeader(#[from] InvalidHeader),

    #[error("Unknown security scheme: {0}")]
    UnknownSecurityScheme(String),

    #[error("Unsupported security scheme '{scheme}' of type {kind}")]
    UnsupportedSecurityScheme { scheme: String, kind: String },

    #[error("Missing credential for security scheme '{scheme}': set {variable}")]
    MissingSecret { scheme: String, variable: String },

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpenApiToolsError {
    /// Whether this error came from credential binding rather than request shaping.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::UnknownSecurityScheme(_)
                | Self::UnsupportedSecurityScheme { .. }
                | Self::MissingSecret { .. }
        )
    }
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
