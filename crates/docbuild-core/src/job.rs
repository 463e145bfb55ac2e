//! Build jobs and their lifecycle.
//!
//! A job moves through `Queued -> Running -> Finished | Failed`. Terminal states
//! are final; no job ever re-enters the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EnvironmentId, JobId};

/// Status of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a free build slot.
    Queued,
    /// Dispatched to a worker.
    Running,
    /// Every requested format was rendered.
    Finished,
    /// Environment acquisition or at least one format failed.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Finished)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job {job_id}: invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Deduplication key of a job: one live job per (project, document unit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub project: String,
    pub document: String,
}

impl JobKey {
    pub fn new(project: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            document: document.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project, self.document)
    }
}

/// One scheduled build of a document unit at a specific revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project: String,
    pub document: String,
    pub branch: String,
    /// Source revision being built.
    pub revision: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Environment running this job. Only set while `Running`.
    pub environment: Option<EnvironmentId>,
}

impl Job {
    pub fn new(
        id: JobId,
        project: impl Into<String>,
        document: impl Into<String>,
        branch: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project: project.into(),
            document: document.into(),
            branch: branch.into(),
            revision: revision.into(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            environment: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.project.clone(), self.document.clone())
    }

    pub fn matches(&self, key: &JobKey) -> bool {
        self.project == key.project && self.document == key.document
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Move a queued job to `Running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Move a running job to its terminal state and drop its environment handle.
    pub fn finish(&mut self, success: bool, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let next = if success {
            JobStatus::Finished
        } else {
            JobStatus::Failed
        };
        self.transition(next)?;
        self.finished_at = Some(now);
        self.environment = None;
        Ok(())
    }
}
