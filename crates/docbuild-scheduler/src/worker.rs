//! Executes one build job inside an isolated environment.

use chrono::Utc;
use docbuild_config::{RenderContext, SystemConfig};
use docbuild_core::artifact::{BuildInfo, artifact_file_name, failure_log_file_name};
use docbuild_core::environment::{
    EnvironmentHandle, EnvironmentProvider, EnvironmentSpec, ExecOutput, VolumeMount, shell,
};
use docbuild_core::job::Job;
use docbuild_core::project::{DocumentUnit, OutputFormat, Project};
use docbuild_core::{EnvironmentId, JobId};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const SOURCE_MOUNT: &str = "/mnt/source";
pub const SCRIPTS_MOUNT: &str = "/mnt/scripts";
pub const OUTPUT_MOUNT: &str = "/mnt/out";

const STATUS_FILE: &str = "/tmp/build_status";
const LOG_FILE: &str = "/tmp/build_log";
const DOC_INFO_FILE: &str = "/tmp/doc_info.json";
const BUILD_INFO: &str = "build_info.json";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to acquire build environment: {0}")]
    Acquire(docbuild_core::Error),

    #[error("failed to prepare staging directory: {0}")]
    Staging(std::io::Error),

    #[error("failed to transfer sources: {0}")]
    Transfer(String),
}

/// Filesystem and container settings shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub image: String,
    /// Build directory inside the environment.
    pub repo_dir: String,
    pub render_command: String,
    pub scripts_dir: PathBuf,
    pub builds_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Host directory for per-job staging directories.
    pub staging_dir: PathBuf,
    /// Record the environment id in build info.
    pub debug: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            image: config.container.image.clone(),
            repo_dir: config.container.repo_dir.clone(),
            render_command: config.container.render_command.clone(),
            scripts_dir: config.paths.scripts.clone(),
            builds_dir: config.builds_dir(),
            logs_dir: config.logs_dir(),
            staging_dir: config.tmp_dir(),
            debug: config.daemon.debug,
        }
    }
}

/// Outcome of rendering one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatResult {
    pub format: OutputFormat,
    pub success: bool,
    /// Seconds spent rendering.
    pub compile_time: u64,
    /// Archive delivered to the builds directory.
    pub artifact: Option<PathBuf>,
    /// Persisted failure log.
    pub log: Option<PathBuf>,
}

/// Outcome of one job.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub job_id: JobId,
    pub environment: EnvironmentId,
    pub results: Vec<FormatResult>,
}

impl BuildReport {
    /// True only if every requested format rendered.
    pub fn success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.success)
    }
}

/// Product metadata the render scripts leave behind.
#[derive(Debug, Default, Deserialize)]
struct DocInfo {
    product: Option<String>,
    productnumber: Option<String>,
    guide: Option<String>,
}

/// Runs jobs in environments from an [`EnvironmentProvider`].
pub struct BuildWorker {
    provider: Arc<dyn EnvironmentProvider>,
    settings: WorkerSettings,
}

impl BuildWorker {
    pub fn new(provider: Arc<dyn EnvironmentProvider>, settings: WorkerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Build every format of `unit` for `job`.
    ///
    /// `on_acquired` runs once the environment exists. The environment and the
    /// staging directory are released on every path after a successful acquire.
    pub async fn run<F>(
        &self,
        job: &Job,
        project: &Project,
        unit: &DocumentUnit,
        on_acquired: F,
    ) -> Result<BuildReport, WorkerError>
    where
        F: FnOnce(&EnvironmentHandle) + Send,
    {
        let env_id = EnvironmentId::new();
        let staging = self
            .settings
            .staging_dir
            .join(format!("job-{}-{}", job.id, env_id));
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(WorkerError::Staging)?;

        let spec = EnvironmentSpec {
            id: env_id,
            image: self.settings.image.clone(),
            working_dir: None,
            env: HashMap::new(),
            volumes: vec![
                VolumeMount {
                    source: project.repository.clone(),
                    mount_path: SOURCE_MOUNT.to_string(),
                    read_only: true,
                },
                VolumeMount {
                    source: self.settings.scripts_dir.clone(),
                    mount_path: SCRIPTS_MOUNT.to_string(),
                    read_only: true,
                },
                VolumeMount {
                    source: staging.clone(),
                    mount_path: OUTPUT_MOUNT.to_string(),
                    read_only: false,
                },
            ],
        };

        let handle = match self.provider.acquire(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                remove_staging(&staging).await;
                return Err(WorkerError::Acquire(e));
            }
        };
        info!(job_id = %job.id, environment = %handle.id, "Environment acquired");
        on_acquired(&handle);

        let result = self.build(&handle, job, project, unit, &staging).await;

        if let Err(e) = self.provider.release(&handle).await {
            warn!(job_id = %job.id, environment = %handle.id, error = %e, "Failed to release environment");
        }
        remove_staging(&staging).await;

        result
    }

    async fn build(
        &self,
        handle: &EnvironmentHandle,
        job: &Job,
        project: &Project,
        unit: &DocumentUnit,
        staging: &Path,
    ) -> Result<BuildReport, WorkerError> {
        let repo_name = project.repo_dir_name();
        let repo_path = format!("{}/{}", self.settings.repo_dir, repo_name);

        let transfer = format!(
            "mkdir -p {path} && cp -a {source}/. {path}/ && cp -a {scripts}/. /tmp/",
            path = sh_quote(&repo_path),
            source = SOURCE_MOUNT,
            scripts = SCRIPTS_MOUNT,
        );
        let output = self
            .provider
            .exec(handle, shell(transfer))
            .await
            .map_err(|e| WorkerError::Transfer(e.to_string()))?;
        if !output.success() {
            return Err(WorkerError::Transfer(output.stderr.trim().to_string()));
        }
        debug!(job_id = %job.id, path = %repo_path, "Sources transferred");

        let mut results = Vec::with_capacity(unit.formats.len());
        for format in &unit.formats {
            let ctx = RenderContext::for_job(job, unit, *format, repo_path.clone(), repo_name.clone());
            let result = self.render(handle, job, unit, *format, &ctx, staging).await;
            info!(
                job_id = %job.id,
                document = %unit.name,
                format = %format,
                success = result.success,
                compile_time = result.compile_time,
                "Format rendered"
            );
            results.push(result);
        }

        Ok(BuildReport {
            job_id: job.id,
            environment: handle.id,
            results,
        })
    }

    /// Render one format. Failures are captured in the result, never propagated.
    async fn render(
        &self,
        handle: &EnvironmentHandle,
        job: &Job,
        unit: &DocumentUnit,
        format: OutputFormat,
        ctx: &RenderContext,
        staging: &Path,
    ) -> FormatResult {
        let started = Instant::now();
        let mut result = FormatResult {
            format,
            success: false,
            compile_time: 0,
            artifact: None,
            log: None,
        };

        let (success, log) = match self.render_step(handle, ctx).await {
            Ok(outcome) => outcome,
            Err(message) => (false, message),
        };
        result.compile_time = started.elapsed().as_secs();

        if success {
            match self
                .package(handle, job, unit, format, result.compile_time, staging)
                .await
            {
                Ok(artifact) => {
                    result.success = true;
                    result.artifact = Some(artifact);
                    return result;
                }
                Err(message) => {
                    result.log = self
                        .persist_log(&unit.name, format, &format!("{}\n{}", log, message))
                        .await;
                    return result;
                }
            }
        }

        result.log = self.persist_log(&unit.name, format, &log).await;
        result
    }

    /// Run the render command and read back its status and log.
    async fn render_step(
        &self,
        handle: &EnvironmentHandle,
        ctx: &RenderContext,
    ) -> Result<(bool, String), String> {
        self.exec(
            handle,
            shell(format!("rm -f {} {} {}", STATUS_FILE, LOG_FILE, DOC_INFO_FILE)),
        )
        .await?;

        let command = ctx.interpolate(&self.settings.render_command);
        let render = self.exec(handle, shell(command)).await?;

        let status = self.exec(handle, cat(STATUS_FILE)).await?;
        if !status.success() {
            return Err(format!(
                "render command left no status (exit {:?}):\n{}{}",
                render.exit_code, render.stdout, render.stderr
            ));
        }

        let log = self.exec(handle, cat(LOG_FILE)).await?;
        let log = if log.success() {
            log.stdout
        } else {
            format!("{}{}", render.stdout, render.stderr)
        };

        Ok((status.stdout.contains("success"), log))
    }

    /// Append build info to the rendered archive and deliver it to the builds directory.
    async fn package(
        &self,
        handle: &EnvironmentHandle,
        job: &Job,
        unit: &DocumentUnit,
        format: OutputFormat,
        compile_time: u64,
        staging: &Path,
    ) -> Result<PathBuf, String> {
        let doc_info = match self.exec(handle, cat(DOC_INFO_FILE)).await? {
            out if out.success() => match serde_json::from_str::<DocInfo>(&out.stdout) {
                Ok(info) => info,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Ignoring malformed doc info");
                    DocInfo::default()
                }
            },
            _ => DocInfo::default(),
        };

        let info = BuildInfo {
            project: job.project.clone(),
            dc_file: unit.name.clone(),
            format,
            revision: job.revision.clone(),
            branch: job.branch.clone(),
            build_status: true,
            compile_time,
            product: doc_info.product,
            productnumber: doc_info.productnumber,
            guide: doc_info.guide,
            environment: self.settings.debug.then(|| handle.id.to_string()),
        };
        let json = serde_json::to_vec_pretty(&info).map_err(|e| e.to_string())?;
        tokio::fs::write(staging.join(BUILD_INFO), json)
            .await
            .map_err(|e| format!("failed to write {}: {}", BUILD_INFO, e))?;

        let file_name = artifact_file_name(Utc::now().timestamp(), unit, format);
        let archive = format!("/tmp/documentation_{}.tar", format);
        let script = format!(
            "cp {out}/{info} /tmp/{info} && tar -C /tmp --append --file={archive} {info} && gzip -c {archive} > {out}/{name}",
            out = OUTPUT_MOUNT,
            info = BUILD_INFO,
            archive = archive,
            name = file_name,
        );
        let packed = self.exec(handle, shell(script)).await?;
        if !packed.success() {
            return Err(format!("packaging failed: {}", packed.stderr.trim()));
        }

        tokio::fs::create_dir_all(&self.settings.builds_dir)
            .await
            .map_err(|e| e.to_string())?;
        let target = self.settings.builds_dir.join(&file_name);
        move_file(&staging.join(&file_name), &target)
            .await
            .map_err(|e| format!("failed to deliver {}: {}", file_name, e))?;

        Ok(target)
    }

    async fn persist_log(&self, document: &str, format: OutputFormat, log: &str) -> Option<PathBuf> {
        let path = self
            .settings
            .logs_dir
            .join(failure_log_file_name(document, format, Utc::now().timestamp()));
        let written = async {
            tokio::fs::create_dir_all(&self.settings.logs_dir).await?;
            tokio::fs::write(&path, log).await
        }
        .await;

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write build log");
                None
            }
        }
    }

    async fn exec(&self, handle: &EnvironmentHandle, cmd: Vec<String>) -> Result<ExecOutput, String> {
        self.provider
            .exec(handle, cmd)
            .await
            .map_err(|e| e.to_string())
    }
}

fn cat(path: &str) -> Vec<String> {
    vec!["cat".to_string(), path.to_string()]
}

fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

/// Remove staging directories left behind by an interrupted run of `job`.
pub(crate) async fn discard_staging(staging_dir: &Path, job: JobId) {
    let prefix = format!("job-{}-", job);
    let mut entries = match tokio::fs::read_dir(staging_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %staging_dir.display(), error = %e, "No staging directory to clean");
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            remove_staging(&entry.path()).await;
        }
    }
}

async fn remove_staging(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await {
        warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
    }
}
