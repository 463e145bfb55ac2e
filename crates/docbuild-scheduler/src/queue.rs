//! In-memory job queue: the scheduler's single piece of shared state.
//!
//! All reads and writes go through one mutex. Critical sections only flip job
//! state or copy it out; no I/O happens while the lock is held.

use chrono::Utc;
use docbuild_core::job::{Job, JobKey, JobStatus};
use docbuild_core::project::{DocumentUnit, Project};
use docbuild_core::{EnvironmentId, JobId};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("a build for {0} is already queued or running")]
    AlreadyQueued(JobKey),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("job {0} is not running")]
    NotRunning(JobId),
}

#[derive(Debug)]
struct QueueState {
    next_id: JobId,
    queued: VecDeque<Job>,
    running: Vec<Job>,
    recent: VecDeque<Job>,
}

impl QueueState {
    fn is_live(&self, key: &JobKey) -> bool {
        self.queued.iter().any(|j| j.matches(key)) || self.running.iter().any(|j| j.matches(key))
    }
}

/// Immutable copy of the queue at one point in time.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Queued jobs in dispatch order.
    pub queued: Vec<Job>,
    /// Running jobs in dispatch order.
    pub running: Vec<Job>,
    /// Recently finished jobs, oldest first.
    pub recent: Vec<Job>,
}

impl QueueSnapshot {
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Every job: running, then queued, then recent.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.running
            .iter()
            .chain(self.queued.iter())
            .chain(self.recent.iter())
    }
}

/// FIFO job queue with per-document deduplication and bounded history.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    history: usize,
}

impl JobQueue {
    /// Create a queue keeping at most `history` finished jobs.
    pub fn new(history: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: JobId::new(1),
                queued: VecDeque::new(),
                running: Vec::new(),
                recent: VecDeque::new(),
            }),
            history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a build of `unit` at `revision`.
    ///
    /// Rejected if a job for the same project and document is still queued or running.
    pub fn enqueue(
        &self,
        project: &Project,
        unit: &DocumentUnit,
        revision: &str,
    ) -> Result<JobId, SchedulerError> {
        let key = JobKey::new(project.name.clone(), unit.name.clone());
        let mut state = self.lock();

        if state.is_live(&key) {
            return Err(SchedulerError::AlreadyQueued(key));
        }

        let id = state.next_id;
        state.next_id = id.next();
        state.queued.push_back(Job::new(
            id,
            project.name.clone(),
            unit.name.clone(),
            project.branch.clone(),
            revision,
        ));

        info!(job_id = %id, project = %project.name, document = %unit.name, revision = %revision, "Job queued");
        Ok(id)
    }

    /// Promote queued jobs to running, oldest first, until `max_running` jobs run.
    ///
    /// Returns copies of the promoted jobs.
    pub fn dispatch_ready(&self, max_running: usize) -> Vec<Job> {
        let mut state = self.lock();
        let mut promoted = Vec::new();
        let now = Utc::now();

        while state.running.len() < max_running {
            let Some(mut job) = state.queued.pop_front() else {
                break;
            };
            if job.start(now).is_err() {
                // Only queued jobs live in `queued`.
                continue;
            }
            debug!(job_id = %job.id, "Job dispatched");
            promoted.push(job.clone());
            state.running.push(job);
        }

        promoted
    }

    /// Record the environment a running job was given.
    pub fn attach_environment(
        &self,
        id: JobId,
        environment: EnvironmentId,
    ) -> Result<(), SchedulerError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.running.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.environment = Some(environment);
                Ok(())
            }
            None if state.queued.iter().any(|j| j.id == id)
                || state.recent.iter().any(|j| j.id == id) =>
            {
                Err(SchedulerError::NotRunning(id))
            }
            None => Err(SchedulerError::UnknownJob(id)),
        }
    }

    /// Move a running job to its terminal state and into the history.
    pub fn complete(&self, id: JobId, success: bool) -> Result<Job, SchedulerError> {
        let mut state = self.lock();

        let Some(index) = state.running.iter().position(|j| j.id == id) else {
            if state.queued.iter().any(|j| j.id == id) || state.recent.iter().any(|j| j.id == id)
            {
                return Err(SchedulerError::NotRunning(id));
            }
            return Err(SchedulerError::UnknownJob(id));
        };

        let mut job = state.running.remove(index);
        job.finish(success, Utc::now())
            .map_err(|_| SchedulerError::NotRunning(id))?;

        state.recent.push_back(job.clone());
        while state.recent.len() > self.history {
            state.recent.pop_front();
        }

        info!(job_id = %id, status = %job.status, "Job completed");
        Ok(job)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            queued: state.queued.iter().cloned().collect(),
            running: state.running.clone(),
            recent: state.recent.iter().cloned().collect(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().queued.len()
    }

    /// Status of a job still known to the queue.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        let state = self.lock();
        state
            .queued
            .iter()
            .chain(state.running.iter())
            .chain(state.recent.iter())
            .find(|j| j.id == id)
            .map(|j| j.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbuild_core::project::OutputFormat;

    fn project(name: &str) -> Project {
        Project {
            name: name.to_string(),
            repository: "/srv/repo".into(),
            branch: "main".to_string(),
            last_revision: None,
            maintainer: None,
            documents: vec![],
            notifications: Default::default(),
        }
    }

    fn unit(name: &str) -> DocumentUnit {
        DocumentUnit {
            name: name.to_string(),
            main: "MAIN.xml".to_string(),
            rootid: None,
            formats: vec![OutputFormat::Pdf],
        }
    }

    #[test]
    fn test_dedup_while_live() {
        let queue = JobQueue::new(10);
        let p = project("p");
        let d = unit("DC-a");

        let first = queue.enqueue(&p, &d, "r1").unwrap();
        assert_eq!(
            queue.enqueue(&p, &d, "r2"),
            Err(SchedulerError::AlreadyQueued(JobKey::new("p", "DC-a")))
        );

        queue.dispatch_ready(1);
        assert!(matches!(
            queue.enqueue(&p, &d, "r2"),
            Err(SchedulerError::AlreadyQueued(_))
        ));
        assert_eq!(queue.snapshot().jobs().count(), 1);

        queue.complete(first, true).unwrap();
        let second = queue.enqueue(&p, &d, "r2").unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_same_document_in_other_project_is_distinct() {
        let queue = JobQueue::new(10);
        queue.enqueue(&project("a"), &unit("DC-x"), "r").unwrap();
        queue.enqueue(&project("b"), &unit("DC-x"), "r").unwrap();
        assert_eq!(queue.queued_count(), 2);
    }

    #[test]
    fn test_fifo_dispatch() {
        let queue = JobQueue::new(10);
        let p = project("p");
        let a = queue.enqueue(&p, &unit("DC-a"), "r").unwrap();
        let b = queue.enqueue(&p, &unit("DC-b"), "r").unwrap();
        let c = queue.enqueue(&p, &unit("DC-c"), "r").unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            let promoted = queue.dispatch_ready(1);
            assert_eq!(promoted.len(), 1);
            order.push(promoted[0].id);
            queue.complete(promoted[0].id, true).unwrap();
        }
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_bound_scenario() {
        let queue = JobQueue::new(10);
        let p = project("p");
        for name in ["DC-a", "DC-b", "DC-c"] {
            queue.enqueue(&p, &unit(name), "r").unwrap();
        }

        let promoted = queue.dispatch_ready(2);
        assert_eq!(promoted.len(), 2);
        assert_eq!(queue.running_count(), 2);
        assert_eq!(queue.queued_count(), 1);

        queue.complete(promoted[0].id, true).unwrap();
        assert_eq!(queue.running_count(), 1);

        let next = queue.dispatch_ready(2);
        assert_eq!(next.len(), 1);
        assert_eq!(queue.running_count(), 2);

        queue.complete(promoted[1].id, false).unwrap();
        assert_eq!(queue.running_count(), 1);
        assert!(queue.dispatch_ready(2).is_empty());
        assert_eq!(queue.running_count(), 1);

        queue.complete(next[0].id, true).unwrap();
        assert_eq!(queue.running_count(), 0);
    }

    #[test]
    fn test_running_count_never_exceeds_bound() {
        let queue = JobQueue::new(5);
        let p = project("p");
        let max = 3;
        let mut next_doc = 0;

        // Deterministic interleaving of enqueue, dispatch and complete.
        for step in 0..200usize {
            match step % 5 {
                0 | 1 => {
                    let _ = queue.enqueue(&p, &unit(&format!("DC-{}", next_doc % 7)), "r");
                    next_doc += 1;
                }
                2 | 3 => {
                    queue.dispatch_ready(max);
                }
                _ => {
                    let snapshot = queue.snapshot();
                    if let Some(job) = snapshot.running.get(step % 2) {
                        queue.complete(job.id, step % 3 == 0).unwrap();
                    }
                }
            }
            assert!(queue.running_count() <= max);
        }
    }

    #[test]
    fn test_state_transitions_are_monotonic() {
        let queue = JobQueue::new(10);
        let p = project("p");
        let id = queue.enqueue(&p, &unit("DC-a"), "r").unwrap();
        assert_eq!(queue.status(id), Some(JobStatus::Queued));

        assert_eq!(queue.complete(id, true), Err(SchedulerError::NotRunning(id)));
        assert_eq!(queue.status(id), Some(JobStatus::Queued));

        queue.dispatch_ready(1);
        assert_eq!(queue.status(id), Some(JobStatus::Running));

        let job = queue.complete(id, false).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(queue.complete(id, true), Err(SchedulerError::NotRunning(id)));
        assert_eq!(queue.status(id), Some(JobStatus::Failed));
        assert_eq!(
            queue.complete(JobId::new(99), true),
            Err(SchedulerError::UnknownJob(JobId::new(99)))
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let queue = JobQueue::new(2);
        let p = project("p");
        let mut ids = Vec::new();
        for name in ["DC-a", "DC-b", "DC-c"] {
            ids.push(queue.enqueue(&p, &unit(name), "r").unwrap());
        }
        for job in queue.dispatch_ready(3) {
            queue.complete(job.id, true).unwrap();
        }

        let snapshot = queue.snapshot();
        let recent: Vec<_> = snapshot.recent.iter().map(|j| j.id).collect();
        assert_eq!(recent, vec![ids[1], ids[2]]);
        assert_eq!(queue.status(ids[0]), None);
    }

    #[test]
    fn test_environment_only_on_running_jobs() {
        let queue = JobQueue::new(10);
        let p = project("p");
        let id = queue.enqueue(&p, &unit("DC-a"), "r").unwrap();
        let env = EnvironmentId::new();

        assert_eq!(
            queue.attach_environment(id, env),
            Err(SchedulerError::NotRunning(id))
        );
        queue.dispatch_ready(1);
        queue.attach_environment(id, env).unwrap();
        assert_eq!(queue.snapshot().running[0].environment, Some(env));

        let job = queue.complete(id, true).unwrap();
        assert!(job.environment.is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let queue = JobQueue::new(10);
        let p = project("p");
        queue.enqueue(&p, &unit("DC-a"), "r").unwrap();

        let mut snapshot = queue.snapshot();
        snapshot.queued.clear();
        assert_eq!(queue.queued_count(), 1);
    }
}
