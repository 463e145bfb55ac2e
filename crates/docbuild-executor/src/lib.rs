//! Build environment backends for docbuild.
//!
//! Provides environment provider implementations:
//! - Local Docker

pub mod docker;

pub use docbuild_core::environment::{
    EnvironmentHandle, EnvironmentProvider, EnvironmentSpec, ExecOutput, VolumeMount,
};
pub use docker::DockerProvider;
