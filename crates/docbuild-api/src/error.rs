//! API error handling.

use docbuild_core::protocol::ErrorResponse;
use thiserror::Error;

/// Errors answered with an `{"error": ...}` payload. The connection stays open.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access denied! Unauthorized token!")]
    Unauthorized,

    #[error("The DC-File name is not valid!")]
    InvalidDocument,

    #[error("Format is not valid. Please choose between: html, single_html, and pdf")]
    InvalidFormat,

    #[error("No log entries found for this DC-File and Format!")]
    LogNotFound,

    #[error("Internal error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn to_payload(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
        }
    }
}
