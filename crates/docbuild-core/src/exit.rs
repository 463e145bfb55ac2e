//! Process exit codes for fatal start-up failures.
//!
//! Only binaries turn these into a process exit; library code returns them as values.

use thiserror::Error;

pub const E_INVALID_CLI: i32 = 2;
pub const E_CONFIG_FILE_SYNTAX_ERROR: i32 = 3;
pub const E_CONFIG_PROP_NOT_FOUND: i32 = 4;
pub const E_CONFIG_FILE_PERMISSION_DENIED: i32 = 5;
pub const E_REGISTRY_SYNTAX_ERROR: i32 = 9;
pub const E_REGISTRY_NOT_FOUND: i32 = 10;
pub const E_ENVIRONMENT_UNAVAILABLE: i32 = 11;
pub const E_INVALID_GIT_REPO: i32 = 12;
pub const E_IMAGE_MISSING: i32 = 13;
pub const E_API_SERVER_CONN_FAILED: i32 = 14;
pub const E_API_SERVER_CLOSED_CONNECTION: i32 = 15;
pub const E_API_SERVER_INVALID_DATA_SENT: i32 = 16;
pub const E_AUTH_FILE_ERROR: i32 = 17;

/// A failure that ends the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("configuration file syntax error: {0}")]
    ConfigSyntax(String),

    #[error("configuration property not set: {0}")]
    MissingProperty(String),

    #[error("configuration file not accessible: {0}")]
    ConfigAccess(String),

    #[error("project registry syntax error: {0}")]
    RegistrySyntax(String),

    #[error("project registry not found: {0}")]
    RegistryNotFound(String),

    #[error("invalid repository: {0}")]
    InvalidRepository(String),

    #[error("build environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("container image '{0}' is not available locally")]
    ImageMissing(String),

    #[error("authorization file error: {0}")]
    AuthFile(String),

    #[error("connection to API server failed: {0}")]
    ApiConnectionFailed(String),

    #[error("the API server has closed the connection")]
    ApiConnectionClosed,

    #[error("invalid data received from API server: {0}")]
    ApiInvalidData(String),
}

impl FatalError {
    pub fn code(&self) -> i32 {
        match self {
            FatalError::ConfigSyntax(_) => E_CONFIG_FILE_SYNTAX_ERROR,
            FatalError::MissingProperty(_) => E_CONFIG_PROP_NOT_FOUND,
            FatalError::ConfigAccess(_) => E_CONFIG_FILE_PERMISSION_DENIED,
            FatalError::RegistrySyntax(_) => E_REGISTRY_SYNTAX_ERROR,
            FatalError::RegistryNotFound(_) => E_REGISTRY_NOT_FOUND,
            FatalError::InvalidRepository(_) => E_INVALID_GIT_REPO,
            FatalError::EnvironmentUnavailable(_) => E_ENVIRONMENT_UNAVAILABLE,
            FatalError::ImageMissing(_) => E_IMAGE_MISSING,
            FatalError::AuthFile(_) => E_AUTH_FILE_ERROR,
            FatalError::ApiConnectionFailed(_) => E_API_SERVER_CONN_FAILED,
            FatalError::ApiConnectionClosed => E_API_SERVER_CLOSED_CONNECTION,
            FatalError::ApiInvalidData(_) => E_API_SERVER_INVALID_DATA_SENT,
        }
    }
}
