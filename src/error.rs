//! Error types for the avatar configurator

use thiserror::Error;

/// Main error type for the avatar configurator
#[derive(Error, Debug)]
pub enum ConfiguratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Record store errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Request to {collection} failed: {message}")]
    Request { collection: String, message: String },

    #[error("Unexpected response from {collection}: {message}")]
    Response { collection: String, message: String },

    #[error("Record has no file storage identity: {0}")]
    MissingFileIdentity(String),

    #[error("Failed to load records: {0}")]
    Fixture(String),
}

/// Customization store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("No category is currently selected")]
    NoCurrentCategory,

    #[error("No renderer has registered the {0} capability")]
    CapabilityMissing(&'static str),

    #[error("Renderer failed to handle {capability}: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },
}

/// Export pipeline errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("An export is already in progress")]
    Busy,

    #[error("Export was cancelled before it finished")]
    Cancelled,

    #[error("Scene serialization failed: {0}")]
    Scene(String),

    #[error("Failed to parse binary document: {0}")]
    Parse(String),

    #[error("Transform {op} failed: {message}")]
    Transform { op: String, message: String },

    #[error("Failed to write binary document: {0}")]
    Serialize(String),

    #[error("Failed to save export: {0}")]
    Save(String),
}

/// Result type alias for configurator operations
pub type Result<T> = std::result::Result<T, ConfiguratorError>;
