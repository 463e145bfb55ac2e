//! Core domain types and traits for docbuild.
//!
//! This crate contains:
//! - Job and environment identifiers
//! - Project, document unit and output format types
//! - Job records and the job status state machine
//! - The isolated build environment trait
//! - Artifact and failure log naming
//! - Status/trigger wire protocol messages
//! - Error types and process exit codes

pub mod artifact;
pub mod environment;
pub mod error;
pub mod exit;
pub mod id;
pub mod job;
pub mod project;
pub mod protocol;

pub use error::{Error, Result};
pub use id::{EnvironmentId, JobId};
