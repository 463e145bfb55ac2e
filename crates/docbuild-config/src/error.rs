//! Configuration parsing errors.

use docbuild_core::exit::FatalError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error in {path}: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: kdl::KdlError,
    },

    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("file not found or unreadable: {0}")]
    NotFound(PathBuf),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("invalid DC file {path}: {message}")]
    DocumentUnit { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    /// Map a failure to load the project registry to its process exit reason.
    pub fn into_registry_fatal(self) -> FatalError {
        match self {
            ConfigError::NotFound(path) => FatalError::RegistryNotFound(path.display().to_string()),
            other => FatalError::RegistrySyntax(other.to_string()),
        }
    }

    /// Map a failure to load the system configuration to its process exit reason.
    pub fn into_system_fatal(self) -> FatalError {
        match self {
            ConfigError::MissingField(field) => FatalError::MissingProperty(field),
            ConfigError::NotFound(path) => FatalError::ConfigAccess(path.display().to_string()),
            ConfigError::Io(e) => FatalError::ConfigAccess(e.to_string()),
            other => FatalError::ConfigSyntax(other.to_string()),
        }
    }
}
