//! Build outcome notifications.

use crate::worker::FormatResult;
use async_trait::async_trait;
use docbuild_core::job::{Job, JobStatus};
use docbuild_core::project::Notifications;
use tracing::{info, warn};

/// What a notifier learns about a finished job.
#[derive(Debug, Clone)]
pub struct BuildNotification {
    pub job: Job,
    pub maintainer: Option<String>,
    pub targets: Notifications,
    pub results: Vec<FormatResult>,
    /// Set when the job failed before any format was rendered.
    pub error: Option<String>,
}

impl BuildNotification {
    pub fn success(&self) -> bool {
        self.job.status == JobStatus::Finished
    }

    /// One line summary, e.g. `sles/DC-SLES-admin@abc123: pdf ok, html failed`.
    pub fn summary(&self) -> String {
        let detail = match &self.error {
            Some(error) => error.clone(),
            None => self
                .results
                .iter()
                .map(|r| format!("{} {}", r.format, if r.success { "ok" } else { "failed" }))
                .collect::<Vec<_>>()
                .join(", "),
        };
        format!("{}@{}: {}", self.job.key(), self.job.revision, detail)
    }
}

/// Receives every finished job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &BuildNotification);
}

/// Writes outcomes to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &BuildNotification) {
        let emails = n.targets.emails.join(",");
        let irc = n.targets.irc.join(",");
        if n.success() {
            info!(job_id = %n.job.id, emails = %emails, irc = %irc, "Build succeeded: {}", n.summary());
        } else {
            warn!(
                job_id = %n.job.id,
                maintainer = n.maintainer.as_deref().unwrap_or("-"),
                emails = %emails,
                irc = %irc,
                "Build failed: {}",
                n.summary()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docbuild_core::JobId;
    use docbuild_core::project::OutputFormat;

    fn finished(success: bool) -> Job {
        let mut job = Job::new(JobId::new(3), "sles", "DC-SLES-admin", "develop", "abc123");
        job.start(Utc::now()).unwrap();
        job.finish(success, Utc::now()).unwrap();
        job
    }

    fn result(format: OutputFormat, success: bool) -> FormatResult {
        FormatResult {
            format,
            success,
            compile_time: 1,
            artifact: None,
            log: None,
        }
    }

    #[test]
    fn test_summary_lists_formats() {
        let n = BuildNotification {
            job: finished(false),
            maintainer: None,
            targets: Notifications::default(),
            results: vec![
                result(OutputFormat::Pdf, true),
                result(OutputFormat::Html, false),
            ],
            error: None,
        };
        assert!(!n.success());
        assert_eq!(n.summary(), "sles/DC-SLES-admin@abc123: pdf ok, html failed");
    }

    #[test]
    fn test_summary_prefers_error() {
        let n = BuildNotification {
            job: finished(false),
            maintainer: Some("docs@example.com".to_string()),
            targets: Notifications::default(),
            results: vec![],
            error: Some("environment unavailable".to_string()),
        };
        assert_eq!(n.summary(), "sles/DC-SLES-admin@abc123: environment unavailable");
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_both_outcomes() {
        for success in [true, false] {
            let n = BuildNotification {
                job: finished(success),
                maintainer: None,
                targets: Notifications::default(),
                results: vec![result(OutputFormat::Pdf, success)],
                error: None,
            };
            LogNotifier.notify(&n).await;
        }
    }
}
