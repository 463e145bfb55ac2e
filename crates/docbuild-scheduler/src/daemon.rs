//! The build daemon: poll loop, dispatch loop and per-job tasks.

use crate::git::SourceControl;
use crate::impact::{ChangeImpactFilter, DocBookScopeResolver, ScopeResolver};
use crate::notify::{BuildNotification, LogNotifier, Notifier};
use crate::queue::{JobQueue, SchedulerError};
use crate::status::StatusReporter;
use crate::watcher::RepositoryWatcher;
use crate::worker::{BuildWorker, FormatResult, discard_staging};
use docbuild_config::{ProjectRegistry, SystemConfig};
use docbuild_core::JobId;
use docbuild_core::job::Job;
use docbuild_core::project::{DocumentUnit, Project};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Loop timing and admission settings.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub check_interval: Duration,
    pub dispatch_interval: Duration,
    pub max_containers: usize,
}

impl DaemonOptions {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.daemon.check_interval),
            dispatch_interval: DISPATCH_INTERVAL,
            max_containers: config.daemon.max_containers,
        }
    }
}

/// Everything a job task needs, detached from the daemon's lifetime.
#[derive(Clone)]
struct JobContext {
    registry: Arc<ProjectRegistry>,
    queue: Arc<JobQueue>,
    worker: Arc<BuildWorker>,
    notifier: Arc<dyn Notifier>,
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

/// Watches every registered project and keeps the build pool busy.
pub struct Daemon {
    registry: Arc<ProjectRegistry>,
    queue: Arc<JobQueue>,
    scm: Arc<dyn SourceControl>,
    watcher: RepositoryWatcher,
    impact: ChangeImpactFilter,
    worker: Arc<BuildWorker>,
    notifier: Arc<dyn Notifier>,
    options: DaemonOptions,
    /// Cancellation handle of every running job.
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    tasks: Mutex<JoinSet<()>>,
    task_jobs: Mutex<HashMap<task::Id, JobId>>,
}

impl Daemon {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        queue: Arc<JobQueue>,
        scm: Arc<dyn SourceControl>,
        worker: Arc<BuildWorker>,
        options: DaemonOptions,
    ) -> Self {
        Self {
            registry,
            queue,
            watcher: RepositoryWatcher::new(scm.clone()),
            scm,
            impact: ChangeImpactFilter::new(Arc::new(DocBookScopeResolver)),
            worker,
            notifier: Arc::new(LogNotifier),
            options,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
            task_jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_scope_resolver(mut self, resolver: Arc<dyn ScopeResolver>) -> Self {
        self.impact = ChangeImpactFilter::new(resolver);
        self
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn status(&self) -> StatusReporter {
        StatusReporter::new(self.queue.clone())
    }

    /// Verify every project's working tree before the loops start.
    pub async fn verify_projects(&self) -> bool {
        let mut ok = true;
        for project in self.registry.projects() {
            if let Err(e) = self.watcher.verify(&project).await {
                error!(project = %project.name, error = %e, "Project repository is unusable");
                ok = false;
            }
        }
        ok
    }

    /// Run both loops until `token` is cancelled, then wait for running jobs.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(
            check_interval = ?self.options.check_interval,
            max_containers = self.options.max_containers,
            "Daemon started"
        );

        let poller = {
            let daemon = self.clone();
            let token = token.clone();
            tokio::spawn(async move { daemon.poll_loop(token).await })
        };

        self.dispatch_loop(&token).await;
        if let Err(e) = poller.await {
            error!(error = %e, "Poll loop panicked");
        }

        self.drain().await;
        info!("Daemon stopped");
    }

    async fn poll_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.options.check_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let queued = self.poll_once().await;
                    debug!(queued, "Poll cycle finished");
                }
            }
        }
    }

    async fn dispatch_loop(&self, token: &CancellationToken) {
        let mut interval = tokio::time::interval(self.options.dispatch_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.dispatch_once(token);
                    self.reap().await;
                }
            }
        }
    }

    /// Sync every project and queue the documents its new revision affects.
    ///
    /// Returns the number of jobs queued. A failing project is logged and skipped.
    pub async fn poll_once(&self) -> usize {
        let mut queued = 0;

        for project in self.registry.projects() {
            let outcome = match self.watcher.sync(&project).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(project = %project.name, error = %e, "Skipping project this cycle");
                    continue;
                }
            };
            if !outcome.changed {
                continue;
            }

            for unit in self.impact.affected(&project, &outcome.changed_files) {
                if self.enqueue(&project, unit, &outcome.revision) {
                    queued += 1;
                }
            }

            if let Err(e) = self
                .registry
                .update_revision(&project.name, &outcome.revision)
            {
                error!(project = %project.name, error = %e, "Failed to persist revision");
            }
        }

        queued
    }

    /// Promote ready jobs and spawn one task per promoted job.
    pub fn dispatch_once(&self, parent: &CancellationToken) -> usize {
        let promoted = self.queue.dispatch_ready(self.options.max_containers);
        let count = promoted.len();

        let ctx = self.context();

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut task_jobs = self.task_jobs.lock().unwrap_or_else(|e| e.into_inner());
        for job in promoted {
            let token = parent.child_token();
            ctx.tokens
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(job.id, token.clone());
            let id = job.id;
            let handle = tasks.spawn(run_job(ctx.clone(), job, token));
            task_jobs.insert(handle.id(), id);
        }

        count
    }

    fn context(&self) -> JobContext {
        JobContext {
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            worker: self.worker.clone(),
            notifier: self.notifier.clone(),
            tokens: self.tokens.clone(),
        }
    }

    /// Number of job tasks not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn reap(&self) {
        let finished: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::iter::from_fn(|| tasks.try_join_next_with_id()).collect()
        };
        for result in finished {
            self.settle(result).await;
        }
    }

    /// Wait for every spawned job task to finish.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        if !tasks.is_empty() {
            info!(jobs = tasks.len(), "Waiting for running builds");
        }
        while let Some(result) = tasks.join_next_with_id().await {
            self.settle(result).await;
        }
    }

    /// Forget a finished task. A task that died before completing its job
    /// fails the job so its slot is freed.
    async fn settle(&self, result: Result<(task::Id, ()), JoinError>) {
        let (task_id, failure) = match result {
            Ok((task_id, ())) => (task_id, None),
            Err(e) => (e.id(), Some(e)),
        };
        let job_id = self
            .task_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id);
        let (Some(job_id), Some(e)) = (job_id, failure) else {
            return;
        };

        error!(job_id = %job_id, error = %e, "Job task ended abnormally");
        discard_staging(&self.worker.settings().staging_dir, job_id).await;
        finish_job(
            &self.context(),
            job_id,
            Vec::new(),
            Some(format!("build task ended abnormally: {}", e)),
        )
        .await;
    }

    /// Queue every document of the named projects. Returns the names that exist.
    pub async fn trigger_projects(&self, names: &[String]) -> Vec<String> {
        let mut valid = Vec::new();
        for name in names {
            let Some(project) = self.registry.project(name) else {
                warn!(project = %name, "Trigger for unknown project");
                continue;
            };
            let revision = self.revision_for(&project).await;
            for unit in &project.documents {
                self.enqueue(&project, unit, &revision);
            }
            valid.push(name.clone());
        }
        valid
    }

    /// Queue the named document in every project declaring it. Returns the names that exist.
    pub async fn trigger_documents(&self, names: &[String]) -> Vec<String> {
        let mut valid = Vec::new();
        for name in names {
            let matches = self.registry.find_document(name);
            if matches.is_empty() {
                warn!(document = %name, "Trigger for unknown document");
                continue;
            }
            for (project, unit) in &matches {
                let revision = self.revision_for(project).await;
                self.enqueue(project, unit, &revision);
            }
            valid.push(name.clone());
        }
        valid
    }

    /// Last seen revision, or the branch head for a project never polled.
    async fn revision_for(&self, project: &Project) -> String {
        if let Some(revision) = &project.last_revision {
            return revision.clone();
        }
        match self
            .scm
            .head_revision(&project.repository, &project.branch)
            .await
        {
            Ok(revision) => revision,
            Err(e) => {
                warn!(project = %project.name, error = %e, "Cannot resolve head, building HEAD");
                "HEAD".to_string()
            }
        }
    }

    fn enqueue(&self, project: &Project, unit: &DocumentUnit, revision: &str) -> bool {
        match self.queue.enqueue(project, unit, revision) {
            Ok(_) => true,
            Err(SchedulerError::AlreadyQueued(key)) => {
                debug!(key = %key, "Build already pending");
                false
            }
            Err(e) => {
                error!(project = %project.name, document = %unit.name, error = %e, "Failed to queue build");
                false
            }
        }
    }
}

async fn run_job(ctx: JobContext, job: Job, token: CancellationToken) {
    let (results, error) = match lookup(&ctx.registry, &job) {
        Some((project, unit)) => {
            let queue = ctx.queue.clone();
            let id = job.id;
            let outcome = ctx
                .worker
                .run(&job, &project, &unit, move |handle| {
                    if let Err(e) = queue.attach_environment(id, handle.id) {
                        warn!(job_id = %id, error = %e, "Cannot record environment");
                    }
                })
                .await;
            match outcome {
                Ok(report) => (report.results, None),
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Build failed");
                    (Vec::new(), Some(e.to_string()))
                }
            }
        }
        None => {
            error!(job_id = %job.id, project = %job.project, document = %job.document, "Job refers to an unregistered document");
            (Vec::new(), Some("document is no longer registered".to_string()))
        }
    };

    if token.is_cancelled() {
        debug!(job_id = %job.id, "Job finished after shutdown was requested");
    }

    finish_job(&ctx, job.id, results, error).await;
}

/// Move the job to its terminal state, notify and drop its cancellation handle.
async fn finish_job(
    ctx: &JobContext,
    id: JobId,
    results: Vec<FormatResult>,
    error: Option<String>,
) {
    let success = error.is_none() && !results.is_empty() && results.iter().all(|r| r.success);
    let completed = ctx.queue.complete(id, success);
    ctx.tokens
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&id);

    let finished = match completed {
        Ok(finished) => finished,
        Err(e) => {
            error!(job_id = %id, error = %e, "Failed to complete job");
            return;
        }
    };

    let (maintainer, targets) = ctx
        .registry
        .project(&finished.project)
        .map(|p| (p.maintainer, p.notifications))
        .unwrap_or_default();
    ctx.notifier
        .notify(&BuildNotification {
            job: finished,
            maintainer,
            targets,
            results,
            error,
        })
        .await;
}

fn lookup(registry: &ProjectRegistry, job: &Job) -> Option<(Project, DocumentUnit)> {
    let project = registry.project(&job.project)?;
    let unit = project.document(&job.document)?.clone();
    Some((project, unit))
}
