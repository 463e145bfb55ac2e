//! Detects new revisions in project working trees.

use crate::git::{GitError, SourceControl};
use docbuild_core::project::Project;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("branch '{branch}' does not exist in {}", repo.display())]
    InvalidBranch { repo: PathBuf, branch: String },

    #[error("{} is not a git repository", .0.display())]
    InvalidRepository(PathBuf),

    #[error("repository error: {0}")]
    Repository(GitError),
}

impl From<GitError> for WatchError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::InvalidBranch { repo, branch } => WatchError::InvalidBranch { repo, branch },
            GitError::InvalidRepository(repo) => WatchError::InvalidRepository(repo),
            other => WatchError::Repository(other),
        }
    }
}

/// Files touched between the last seen and the new revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedFiles {
    Known(BTreeSet<String>),
    /// No diff could be computed; every document is a rebuild candidate.
    Unknown,
}

impl ChangedFiles {
    pub fn is_empty(&self) -> bool {
        matches!(self, ChangedFiles::Known(files) if files.is_empty())
    }
}

/// Result of one repository sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Whether the head moved away from the last seen revision.
    pub changed: bool,
    pub revision: String,
    pub changed_files: ChangedFiles,
}

/// Pulls project repositories and reports what changed.
pub struct RepositoryWatcher {
    scm: Arc<dyn SourceControl>,
}

impl RepositoryWatcher {
    pub fn new(scm: Arc<dyn SourceControl>) -> Self {
        Self { scm }
    }

    /// Check that every project's working tree is a repository.
    pub async fn verify(&self, project: &Project) -> Result<(), WatchError> {
        self.scm.verify(&project.repository).await?;
        Ok(())
    }

    /// Update the project's branch from its remote and compare against the last seen revision.
    ///
    /// The working tree is left on whatever branch was checked out before.
    pub async fn sync(&self, project: &Project) -> Result<SyncOutcome, WatchError> {
        let repo = &project.repository;
        self.scm.verify(repo).await?;

        let previous = self.scm.current_branch(repo).await?;
        let switched = previous != project.branch;
        if switched {
            debug!(project = %project.name, from = %previous, to = %project.branch, "Switching branch");
            self.scm.checkout(repo, &project.branch).await?;
        }

        let updated = self.update(project).await;

        if switched {
            if let Err(e) = self.scm.checkout(repo, &previous).await {
                warn!(project = %project.name, branch = %previous, error = %e, "Failed to restore branch");
            }
        }

        let revision = updated?;

        let Some(last) = project.last_revision.as_deref() else {
            info!(project = %project.name, revision = %revision, "First revision seen");
            return Ok(SyncOutcome {
                changed: true,
                revision,
                changed_files: ChangedFiles::Unknown,
            });
        };

        if last == revision {
            return Ok(SyncOutcome {
                changed: false,
                revision,
                changed_files: ChangedFiles::Known(BTreeSet::new()),
            });
        }

        let changed_files = match self.scm.changed_files(repo, last, &revision).await {
            Ok(files) => ChangedFiles::Known(files.into_iter().collect()),
            Err(e) => {
                warn!(project = %project.name, from = %last, to = %revision, error = %e, "Diff failed, treating changes as unknown");
                ChangedFiles::Unknown
            }
        };

        info!(project = %project.name, from = %last, to = %revision, "New revision");
        Ok(SyncOutcome {
            changed: true,
            revision,
            changed_files,
        })
    }

    async fn update(&self, project: &Project) -> Result<String, WatchError> {
        self.scm.pull(&project.repository, true).await?;
        let revision = self
            .scm
            .head_revision(&project.repository, &project.branch)
            .await?;
        Ok(revision)
    }
}
