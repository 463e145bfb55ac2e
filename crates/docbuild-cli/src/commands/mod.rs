//! CLI command implementations.

pub mod config;
pub mod daemon;
pub mod remote;
pub mod token;
pub mod validate;
