//! Source control access for project working trees.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is not a git repository")]
    InvalidRepository(PathBuf),

    #[error("branch '{branch}' does not exist in {}", repo.display())]
    InvalidBranch { repo: PathBuf, branch: String },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

/// Operations the watcher needs on a local working tree.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fail with [`GitError::InvalidRepository`] unless `repo` is a working tree.
    async fn verify(&self, repo: &Path) -> Result<(), GitError>;

    /// Name of the checked out branch.
    async fn current_branch(&self, repo: &Path) -> Result<String, GitError>;

    async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError>;

    /// Update the checked out branch from its remote.
    async fn pull(&self, repo: &Path, force: bool) -> Result<(), GitError>;

    /// Revision at the tip of `branch`.
    async fn head_revision(&self, repo: &Path, branch: &str) -> Result<String, GitError>;

    /// Paths that differ between two revisions, relative to the repository root.
    async fn changed_files(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<String>, GitError>;
}

/// [`SourceControl`] backed by the `git` command line client.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    async fn run(&self, repo: &Path, args: &[&str]) -> Result<String, GitError> {
        debug!(repo = %repo.display(), ?args, "Running git");

        let output = Command::new(&self.program)
            .arg("-C")
            .arg(repo)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn is_unknown_ref(stderr: &str) -> bool {
    stderr.contains("did not match any")
        || stderr.contains("unknown revision")
        || stderr.contains("bad revision")
        || stderr.contains("invalid reference")
}

#[async_trait]
impl SourceControl for GitCli {
    async fn verify(&self, repo: &Path) -> Result<(), GitError> {
        match self.run(repo, &["rev-parse", "--git-dir"]).await {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { .. }) => {
                Err(GitError::InvalidRepository(repo.to_path_buf()))
            }
            Err(e) => Err(e),
        }
    }

    async fn current_branch(&self, repo: &Path) -> Result<String, GitError> {
        self.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        match self.run(repo, &["checkout", "--quiet", branch]).await {
            Err(GitError::CommandFailed { stderr, .. }) if is_unknown_ref(&stderr) => {
                Err(GitError::InvalidBranch {
                    repo: repo.to_path_buf(),
                    branch: branch.to_string(),
                })
            }
            other => other.map(|_| ()),
        }
    }

    async fn pull(&self, repo: &Path, force: bool) -> Result<(), GitError> {
        let mut args = vec!["pull", "--quiet"];
        if force {
            args.push("--force");
        }
        self.run(repo, &args).await.map(|_| ())
    }

    async fn head_revision(&self, repo: &Path, branch: &str) -> Result<String, GitError> {
        let rev = format!("{}^{{commit}}", branch);
        match self.run(repo, &["rev-parse", "--verify", "--quiet", &rev]).await {
            Ok(revision) => Ok(revision),
            Err(GitError::CommandFailed { .. }) => Err(GitError::InvalidBranch {
                repo: repo.to_path_buf(),
                branch: branch.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn changed_files(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<String>, GitError> {
        let output = self
            .run(repo, &["--no-pager", "diff", "--name-only", from, to])
            .await?;
        Ok(output
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
