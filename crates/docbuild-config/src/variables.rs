//! Variable interpolation for the render command template.
//!
//! Supports variables like:
//! - `${document.name}` - DC file name
//! - `${document.main}` - MAIN file of the document
//! - `${document.rootid}` - ROOTID of the document (empty if unscoped)
//! - `${format}` - Output format being rendered
//! - `${repo.path}` - Source tree path inside the environment
//! - `${repo.dir}` - Directory name of the source tree
//! - `${revision}` - Source revision being built
//! - `${project.name}` - Owning project
//! - `${project.branch}` - Branch being built

use docbuild_core::job::Job;
use docbuild_core::project::{DocumentUnit, OutputFormat};
use regex::Regex;
use std::sync::LazyLock;

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

/// Values available to one render invocation.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub document: String,
    pub main: String,
    pub rootid: Option<String>,
    pub format: String,
    pub repo_path: String,
    pub repo_dir: String,
    pub revision: String,
    pub project: String,
    pub branch: String,
}

impl RenderContext {
    /// Context for rendering `unit` of `job` in `format`.
    pub fn for_job(
        job: &Job,
        unit: &DocumentUnit,
        format: OutputFormat,
        repo_path: impl Into<String>,
        repo_dir: impl Into<String>,
    ) -> Self {
        Self {
            document: unit.name.clone(),
            main: unit.main.clone(),
            rootid: unit.rootid.clone(),
            format: format.as_str().to_string(),
            repo_path: repo_path.into(),
            repo_dir: repo_dir.into(),
            revision: job.revision.clone(),
            project: job.project.clone(),
            branch: job.branch.clone(),
        }
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["document", "name"] => Some(self.document.clone()),
            ["document", "main"] => Some(self.main.clone()),
            ["document", "rootid"] => Some(self.rootid.clone().unwrap_or_default()),
            ["format"] => Some(self.format.clone()),
            ["repo", "path"] => Some(self.repo_path.clone()),
            ["repo", "dir"] => Some(self.repo_dir.clone()),
            ["revision"] => Some(self.revision.clone()),
            ["project", "name"] => Some(self.project.clone()),
            ["project", "branch"] => Some(self.branch.clone()),
            _ => None,
        }
    }

    /// Interpolate all variables in a string. Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Variables in `input` that do not resolve.
    pub fn unknown_variables(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbuild_core::JobId;

    fn context() -> RenderContext {
        let job = Job::new(JobId::new(1), "sles", "DC-SLES-admin", "develop", "abc123");
        let unit = DocumentUnit {
            name: "DC-SLES-admin".to_string(),
            main: "MAIN.SLEDS.xml".to_string(),
            rootid: Some("book.admin".to_string()),
            formats: vec![OutputFormat::Pdf],
        };
        RenderContext::for_job(&job, &unit, OutputFormat::Html, "/tmp/build/doc-sle", "doc-sle")
    }

    #[test]
    fn test_default_render_command() {
        let ctx = context();
        let result = ctx.interpolate(crate::system::DEFAULT_RENDER_COMMAND);
        assert_eq!(
            result,
            "/tmp/build.sh DC-SLES-admin html /tmp/build/doc-sle doc-sle"
        );
    }

    #[test]
    fn test_project_and_revision() {
        let ctx = context();
        let result = ctx.interpolate("${project.name}@${project.branch}:${revision}");
        assert_eq!(result, "sles@develop:abc123");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = context();
        assert_eq!(ctx.interpolate("x ${secrets.key}"), "x ${secrets.key}");
        assert_eq!(ctx.unknown_variables("${format} ${nope}"), vec!["nope"]);
    }

    #[test]
    fn test_unscoped_rootid_is_empty() {
        let mut ctx = context();
        ctx.rootid = None;
        assert_eq!(ctx.interpolate("[${document.rootid}]"), "[]");
    }
}
