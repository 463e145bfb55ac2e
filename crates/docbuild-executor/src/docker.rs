//! Docker-backed build environments.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use docbuild_core::environment::{
    EnvironmentHandle, EnvironmentProvider, EnvironmentSpec, ExecOutput, VolumeMount,
};
use docbuild_core::{EnvironmentId, Error, Result};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default upper bound for a single command inside an environment.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Keeps the container alive until it is removed.
const KEEP_ALIVE: &str = "trap 'exit 0' TERM; while true; do sleep 1; done";

/// Build environments as long-lived local Docker containers.
///
/// Each environment is a container running an idle loop; the worker drives it
/// with `exec` calls and force-removes it on release.
pub struct DockerProvider {
    docker: Docker,
    exec_timeout: Duration,
}

impl DockerProvider {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::EnvironmentUnavailable(e.to_string()))?;
        Ok(Self::with_client(docker))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn container_name(id: &EnvironmentId) -> String {
        format!("docbuild-env-{}", id)
    }

    fn binds(volumes: &[VolumeMount]) -> Option<Vec<String>> {
        if volumes.is_empty() {
            return None;
        }
        Some(
            volumes
                .iter()
                .map(|v| {
                    let mode = if v.read_only { "ro" } else { "rw" };
                    format!("{}:{}:{}", v.source.display(), v.mount_path, mode)
                })
                .collect(),
        )
    }

    async fn run_exec(&self, container: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create exec: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start exec: {}", e)))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => {
                            warn!(container = %container, error = %e, "Exec output stream error");
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to inspect exec: {}", e)))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl EnvironmentProvider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::EnvironmentUnavailable(e.to_string()))
    }

    async fn image_available(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(Error::EnvironmentUnavailable(e.to_string())),
        }
    }

    async fn acquire(&self, spec: EnvironmentSpec) -> Result<EnvironmentHandle> {
        let container_name = Self::container_name(&spec.id);

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            binds: Self::binds(&spec.volumes),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                KEEP_ALIVE.to_string(),
            ]),
            env: Some(env),
            working_dir: spec.working_dir.clone(),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, image = %spec.image, "Creating build environment");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| {
                Error::EnvironmentUnavailable(format!("Failed to create container: {}", e))
            })?;

        let handle = EnvironmentHandle {
            id: spec.id,
            provider_id: container.id,
            provider_name: self.name().to_string(),
        };

        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            // The container exists but never ran; do not leak it.
            let _ = self.release(&handle).await;
            return Err(Error::EnvironmentUnavailable(format!(
                "Failed to start container: {}",
                e
            )));
        }

        Ok(handle)
    }

    async fn exec(&self, handle: &EnvironmentHandle, cmd: Vec<String>) -> Result<ExecOutput> {
        let container_name = Self::container_name(&handle.id);
        debug!(container = %container_name, cmd = ?cmd, "Running command");

        tokio::time::timeout(self.exec_timeout, self.run_exec(&container_name, cmd))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "command in {} exceeded {:?}",
                    container_name, self.exec_timeout
                ))
            })?
    }

    async fn release(&self, handle: &EnvironmentHandle) -> Result<()> {
        let container_name = Self::container_name(&handle.id);

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(&container_name, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to remove container: {}", e)))?;

        info!(container = %container_name, "Released build environment");
        Ok(())
    }
}
