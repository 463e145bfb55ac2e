//! KDL configuration parsing for docbuild.
//!
//! This crate handles:
//! - System configuration (`config.kdl`) and dotted property access
//! - The project registry (`projects.kdl`) and revision write-back
//! - DC file parsing
//! - The authorized token store
//! - Render command variable interpolation

pub mod auth;
pub mod dcfile;
pub mod error;
mod kdl_util;
pub mod registry;
pub mod system;
pub mod variables;

pub use auth::{AuthError, TOKEN_LENGTH, TokenStore, generate_token, validate_token};
pub use error::{ConfigError, ConfigResult};
pub use registry::ProjectRegistry;
pub use system::{SystemConfig, default_config_path, set_property};
pub use variables::RenderContext;
