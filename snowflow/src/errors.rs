//! Error types for the snowflow pipeline.
//!
//! Warehouse failures carry the server's error code when one was returned,
//! everything else is wrapped into [`SnowflowError`].

use thiserror::Error;

/// The main error type for snowflow operations.
#[derive(Debug, Error)]
pub enum SnowflowError {
    /// The configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The warehouse rejected a request or could not be reached.
    #[error("{0}")]
    Warehouse(#[from] WarehouseError),

    /// An HTTP request to an API endpoint failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Object storage rejected a write.
    #[error("Storage error: {0}")]
    Storage(#[from] opendal::Error),

    /// An endpoint is not configured or is disabled.
    #[error("Endpoint {name} not found or disabled")]
    EndpointNotFound {
        /// The endpoint name that was looked up.
        name: String,
    },

    /// A value interpolated into SQL text is not a plain identifier.
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A pipeline stage failed.
    #[error("Stage {stage} failed: {message}")]
    StageFailed {
        /// The stage name.
        stage: String,
        /// The failure message.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SnowflowError {
    /// Creates a stage failure error.
    #[must_use]
    pub fn stage_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path of the file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML document is malformed.
    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// `${VAR}` placeholders referenced variables that are not set.
    #[error("Missing environment variable(s): {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    /// A required value is absent after environment resolution.
    #[error("Missing required setting {key} (set {env_var} or {key} in the config file)")]
    MissingValue {
        /// Config key, e.g. `snowflake.account`.
        key: String,
        /// Environment variable that may supply the value.
        env_var: String,
    },

    /// A value is present but not acceptable.
    #[error("Invalid setting {key}: {message}")]
    Invalid {
        /// Config key.
        key: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-setting error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Errors produced by warehouse drivers and connections.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Authentication was rejected.
    #[error("Login failed{}: {message}", code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Login {
        /// Server error code, if any.
        code: Option<String>,
        /// Server message.
        message: String,
    },

    /// A statement was rejected by the warehouse.
    #[error("Statement failed [{code}]: {message}")]
    Statement {
        /// Server error code.
        code: String,
        /// Server message.
        message: String,
    },

    /// The connection was used after being closed.
    #[error("Connection is closed")]
    Closed,

    /// Network-level failure talking to the warehouse.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The warehouse answered with something this client cannot interpret.
    #[error("Unexpected warehouse response: {0}")]
    Protocol(String),

    /// A `PUT` targeted a stage backed by storage this client cannot write.
    #[error("Unsupported stage location type: {0}")]
    UnsupportedStage(String),

    /// A `PUT` targeted a stage that expects client-side encrypted files.
    #[error("Stage {0} requires client-side encryption; use a stage with ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE')")]
    EncryptedStage(String),

    /// The file being transferred could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the staged file failed.
    #[error("Stage upload failed: {0}")]
    Upload(#[from] opendal::Error),
}

impl WarehouseError {
    /// Creates a statement error.
    #[must_use]
    pub fn statement(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = SnowflowError> = std::result::Result<T, E>;
