//! In-memory fakes of the source control and environment seams.

use crate::git::{GitError, SourceControl};
use crate::notify::{BuildNotification, Notifier};
use crate::worker::{OUTPUT_MOUNT, WorkerSettings};
use async_trait::async_trait;
use docbuild_config::system::DEFAULT_RENDER_COMMAND;
use docbuild_core::environment::{
    EnvironmentHandle, EnvironmentProvider, EnvironmentSpec, ExecOutput,
};
use docbuild_core::project::{DocumentUnit, Notifications, OutputFormat, Project};
use docbuild_core::{EnvironmentId, Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;

pub(crate) fn project(name: &str, branch: &str) -> Project {
    Project {
        name: name.to_string(),
        repository: PathBuf::from(format!("/srv/{}", name)),
        branch: branch.to_string(),
        last_revision: None,
        maintainer: None,
        documents: vec![],
        notifications: Notifications::default(),
    }
}

pub(crate) fn unit(name: &str, formats: &[OutputFormat]) -> DocumentUnit {
    DocumentUnit {
        name: name.to_string(),
        main: "MAIN.xml".to_string(),
        rootid: None,
        formats: formats.to_vec(),
    }
}

pub(crate) fn settings(root: &Path) -> WorkerSettings {
    WorkerSettings {
        image: "docbuild/renderer:test".to_string(),
        repo_dir: "/tmp/build".to_string(),
        render_command: DEFAULT_RENDER_COMMAND.to_string(),
        scripts_dir: root.join("scripts"),
        builds_dir: root.join("builds"),
        logs_dir: root.join("logs"),
        staging_dir: root.join("tmp"),
        debug: false,
    }
}

#[derive(Default)]
struct ScmState {
    current: String,
    heads: HashMap<String, String>,
    diff: Option<Vec<String>>,
    fail_pull: bool,
    calls: Vec<String>,
}

/// Working tree with named branches and scripted diffs.
pub(crate) struct FakeScm {
    state: Mutex<ScmState>,
}

impl FakeScm {
    pub(crate) fn new(current: &str, heads: &[(&str, &str)]) -> Self {
        Self {
            state: Mutex::new(ScmState {
                current: current.to_string(),
                heads: heads
                    .iter()
                    .map(|(b, r)| (b.to_string(), r.to_string()))
                    .collect(),
                diff: Some(vec![]),
                ..Default::default()
            }),
        }
    }

    /// `None` makes the diff fail.
    pub(crate) fn set_diff(&self, files: Option<Vec<&str>>) {
        self.state.lock().unwrap().diff =
            files.map(|f| f.into_iter().map(String::from).collect());
    }

    pub(crate) fn set_head(&self, branch: &str, revision: &str) {
        self.state
            .lock()
            .unwrap()
            .heads
            .insert(branch.to_string(), revision.to_string());
    }

    pub(crate) fn fail_pull(&self) {
        self.state.lock().unwrap().fail_pull = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn current(&self) -> String {
        self.state.lock().unwrap().current.clone()
    }
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn verify(&self, _repo: &Path) -> std::result::Result<(), GitError> {
        Ok(())
    }

    async fn current_branch(&self, _repo: &Path) -> std::result::Result<String, GitError> {
        Ok(self.current())
    }

    async fn checkout(&self, repo: &Path, branch: &str) -> std::result::Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        if !state.heads.contains_key(branch) {
            return Err(GitError::InvalidBranch {
                repo: repo.to_path_buf(),
                branch: branch.to_string(),
            });
        }
        state.calls.push(format!("checkout {}", branch));
        state.current = branch.to_string();
        Ok(())
    }

    async fn pull(&self, _repo: &Path, force: bool) -> std::result::Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(if force { "pull --force" } else { "pull" }.to_string());
        if state.fail_pull {
            return Err(GitError::CommandFailed {
                command: "git pull".to_string(),
                stderr: "could not resolve host".to_string(),
            });
        }
        Ok(())
    }

    async fn head_revision(
        &self,
        repo: &Path,
        branch: &str,
    ) -> std::result::Result<String, GitError> {
        self.state
            .lock()
            .unwrap()
            .heads
            .get(branch)
            .cloned()
            .ok_or_else(|| GitError::InvalidBranch {
                repo: repo.to_path_buf(),
                branch: branch.to_string(),
            })
    }

    async fn changed_files(
        &self,
        _repo: &Path,
        from: &str,
        _to: &str,
    ) -> std::result::Result<Vec<String>, GitError> {
        self.state
            .lock()
            .unwrap()
            .diff
            .clone()
            .ok_or_else(|| GitError::CommandFailed {
                command: "git diff".to_string(),
                stderr: format!("fatal: bad object {}", from),
            })
    }
}

#[derive(Default)]
struct ProviderState {
    fail_acquire: bool,
    panic_acquire: bool,
    fail_transfer: bool,
    failing_formats: HashSet<String>,
    out_dirs: HashMap<EnvironmentId, PathBuf>,
    current_format: HashMap<EnvironmentId, String>,
    acquired: usize,
    released: usize,
    last_build_info: Option<String>,
}

/// Environment provider that answers the worker's commands from memory.
///
/// The render script's status follows the format being rendered; the packaging
/// step writes a placeholder archive into the staging mount.
pub(crate) struct FakeProvider {
    state: Mutex<ProviderState>,
    paused: watch::Sender<bool>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ProviderState::default()),
            paused: watch::Sender::new(false),
        }
    }

    pub(crate) fn fail_acquire(&self) {
        self.state.lock().unwrap().fail_acquire = true;
    }

    pub(crate) fn panic_on_acquire(&self) {
        self.state.lock().unwrap().panic_acquire = true;
    }

    pub(crate) fn fail_transfer(&self) {
        self.state.lock().unwrap().fail_transfer = true;
    }

    pub(crate) fn fail_format(&self, format: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_formats
            .insert(format.to_string());
    }

    /// Hold every render command until [`resume`](Self::resume).
    pub(crate) fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub(crate) fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub(crate) fn acquired(&self) -> usize {
        self.state.lock().unwrap().acquired
    }

    pub(crate) fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }

    pub(crate) fn last_build_info(&self) -> Option<String> {
        self.state.lock().unwrap().last_build_info.clone()
    }

    fn ok(stdout: impl Into<String>) -> ExecOutput {
        ExecOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
impl EnvironmentProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_available(&self, _image: &str) -> Result<bool> {
        Ok(true)
    }

    async fn acquire(&self, spec: EnvironmentSpec) -> Result<EnvironmentHandle> {
        let panic_acquire = self.state.lock().unwrap().panic_acquire;
        if panic_acquire {
            panic!("container runtime crashed");
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_acquire {
            return Err(Error::EnvironmentUnavailable("no capacity".to_string()));
        }
        if let Some(out) = spec.volumes.iter().find(|v| v.mount_path == OUTPUT_MOUNT) {
            state.out_dirs.insert(spec.id, out.source.clone());
        }
        state.acquired += 1;
        Ok(EnvironmentHandle {
            id: spec.id,
            provider_id: format!("fake-{}", state.acquired),
            provider_name: self.name().to_string(),
        })
    }

    async fn exec(&self, handle: &EnvironmentHandle, cmd: Vec<String>) -> Result<ExecOutput> {
        if cmd.first().map(String::as_str) == Some("cat") {
            let state = self.state.lock().unwrap();
            let format = state.current_format.get(&handle.id).cloned().unwrap_or_default();
            return Ok(match cmd[1].as_str() {
                "/tmp/build_status" if state.failing_formats.contains(&format) => Self::ok("failed"),
                "/tmp/build_status" => Self::ok("success"),
                "/tmp/build_log" => Self::ok(format!("render log for {}", format)),
                "/tmp/doc_info.json" => {
                    Self::ok(r#"{"product": "SLES", "productnumber": "15", "guide": "Admin"}"#)
                }
                _ => ExecOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "No such file or directory".to_string(),
                },
            });
        }

        let script = cmd.last().cloned().unwrap_or_default();

        if script.starts_with("/tmp/build.sh") {
            let mut paused = self.paused.subscribe();
            let _ = paused.wait_for(|p| !*p).await;
            let format = script.split_whitespace().nth(2).unwrap_or_default().to_string();
            self.state
                .lock()
                .unwrap()
                .current_format
                .insert(handle.id, format);
            return Ok(Self::ok(""));
        }

        let mut state = self.state.lock().unwrap();
        if script.starts_with("mkdir -p") && state.fail_transfer {
            return Ok(ExecOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "cp: cannot create directory: No space left on device".to_string(),
            });
        }
        if let Some((_, name)) = script.split_once(&format!("> {}/", OUTPUT_MOUNT)) {
            let out = state.out_dirs.get(&handle.id).cloned().ok_or_else(|| {
                Error::ExecutionFailed("environment has no output mount".to_string())
            })?;
            state.last_build_info = std::fs::read_to_string(out.join("build_info.json")).ok();
            std::fs::write(out.join(name.trim()), b"archive")
                .map_err(|e| Error::ExecutionFailed(e.to_string()))?;
        }
        Ok(Self::ok(""))
    }

    async fn release(&self, handle: &EnvironmentHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.released += 1;
        state.out_dirs.remove(&handle.id);
        state.current_format.remove(&handle.id);
        Ok(())
    }
}

/// Keeps every notification it receives.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    received: Mutex<Vec<BuildNotification>>,
}

impl RecordingNotifier {
    pub(crate) fn notifications(&self) -> Vec<BuildNotification> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &BuildNotification) {
        self.received.lock().unwrap().push(notification.clone());
    }
}
