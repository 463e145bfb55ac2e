//! Build scheduling for docbuild.
//!
//! Watches project repositories, decides which documents a new revision
//! affects, queues one job per document and runs jobs in isolated
//! environments under a single concurrency bound.

pub mod daemon;
pub mod git;
pub mod impact;
pub mod notify;
pub mod queue;
pub mod status;
pub mod watcher;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use daemon::{Daemon, DaemonOptions};
pub use git::{GitCli, GitError, SourceControl};
pub use impact::{ChangeImpactFilter, DocBookScopeResolver, ImpactError, Scope, ScopeResolver};
pub use notify::{BuildNotification, LogNotifier, Notifier};
pub use queue::{JobQueue, QueueSnapshot, SchedulerError};
pub use status::StatusReporter;
pub use watcher::{ChangedFiles, RepositoryWatcher, SyncOutcome, WatchError};
pub use worker::{BuildReport, BuildWorker, FormatResult, WorkerError, WorkerSettings};
