//! Isolated build environments.
//!
//! Providers hand out disposable execution contexts (containers) in which one
//! job's render steps run. An environment is owned by exactly one job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{EnvironmentId, Result};

/// Specification for an environment to acquire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Unique identifier for this environment.
    pub id: EnvironmentId,
    /// Container image to run.
    pub image: String,
    /// Working directory inside the environment.
    pub working_dir: Option<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Host directories to mount.
    pub volumes: Vec<VolumeMount>,
}

/// A host directory mounted into an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Path on the host.
    pub source: PathBuf,
    /// Path to mount in the environment.
    pub mount_path: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// Handle to an acquired environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    pub id: EnvironmentId,
    /// Provider-specific identifier (e.g. container ID).
    pub provider_id: String,
    /// Name of the provider that owns this environment.
    pub provider_name: String,
}

/// Captured result of one command run inside an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for build environment providers.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Name of this provider.
    fn name(&self) -> &'static str;

    /// Check that the provider's backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Check that the given image can be used without pulling.
    async fn image_available(&self, image: &str) -> Result<bool>;

    /// Create and start a new environment.
    async fn acquire(&self, spec: EnvironmentSpec) -> Result<EnvironmentHandle>;

    /// Run a command inside the environment and wait for it to exit.
    async fn exec(&self, handle: &EnvironmentHandle, cmd: Vec<String>) -> Result<ExecOutput>;

    /// Tear the environment down. Must be safe to call on a half-started environment.
    async fn release(&self, handle: &EnvironmentHandle) -> Result<()>;
}

/// Wrap a shell snippet into a `sh -c` command line.
pub fn shell(script: impl Into<String>) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        let failed = ExecOutput {
            exit_code: Some(2),
            stderr: "boom".to_string(),
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!ExecOutput::default().success());
    }

    #[test]
    fn test_shell_wrapper() {
        assert_eq!(shell("echo hi"), vec!["/bin/sh", "-c", "echo hi"]);
    }
}
