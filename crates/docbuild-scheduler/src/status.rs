//! Client-facing projection of the job queue.

use crate::queue::{JobQueue, QueueSnapshot};
use docbuild_core::job::Job;
use docbuild_core::protocol::{JobView, StatusResponse};
use std::sync::Arc;

/// Answers status queries from queue snapshots.
#[derive(Clone)]
pub struct StatusReporter {
    queue: Arc<JobQueue>,
}

impl StatusReporter {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    pub fn report(&self) -> StatusResponse {
        project(&self.queue.snapshot())
    }
}

/// Running jobs first, then queued in dispatch order, then recent history newest first.
pub fn project(snapshot: &QueueSnapshot) -> StatusResponse {
    let jobs = snapshot
        .running
        .iter()
        .chain(snapshot.queued.iter())
        .chain(snapshot.recent.iter().rev())
        .map(view)
        .collect();

    StatusResponse {
        running_builds: snapshot.running_count(),
        scheduled_builds: snapshot.queued_count(),
        jobs,
    }
}

fn view(job: &Job) -> JobView {
    JobView {
        id: job.id,
        project: job.project.clone(),
        dc_file: job.document.clone(),
        branch: job.branch.clone(),
        commit: job.revision.clone(),
        status: job.status,
        time_created: job.created_at.timestamp(),
        time_started: job.started_at.map(|t| t.timestamp()),
        time_finished: job.finished_at.map(|t| t.timestamp()),
    }
}
