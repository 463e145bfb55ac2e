//! Project registry parsing and revision write-back.
//!
//! The registry is a KDL file with one `project` node per tracked repository:
//!
//! ```kdl
//! project "sles" {
//!     repository "/srv/doc-sle"
//!     branch "develop"
//!     last-revision "4f1c..."
//!     maintainer "docs@example.com"
//!     documents "DC-SLES-admin" "DC-SLES-deployment"
//!     formats "pdf" "html"
//!     notify {
//!         email "docs@example.com"
//!         irc "#suse-doc"
//!     }
//! }
//! ```
//!
//! Project order is the order of the file; status output and log names depend on it.

use crate::dcfile::load_dc_file;
use crate::kdl_util::{child, child_strings, get_first_string_arg, parse_file};
use crate::{ConfigError, ConfigResult};
use docbuild_core::project::{
    DocumentUnit, Notifications, OutputFormat, Project, is_valid_document_name,
};
use kdl::{KdlDocument, KdlEntry, KdlNode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// The set of tracked projects, backed by a KDL file.
#[derive(Debug)]
pub struct ProjectRegistry {
    path: PathBuf,
    projects: RwLock<Vec<Project>>,
    /// Serializes read-modify-write cycles on the backing file.
    write_lock: Mutex<()>,
}

impl ProjectRegistry {
    /// Load and validate the registry at `path`, reading every listed DC file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = parse_file(&path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let projects = parse_projects(&doc, &base_dir)?;

        info!(path = %path.display(), projects = projects.len(), "Loaded project registry");

        Ok(Self {
            path,
            projects: RwLock::new(projects),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of all projects in registry order.
    pub fn projects(&self) -> Vec<Project> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn project(&self, name: &str) -> Option<Project> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Every `(project, document)` pair declaring the document unit `name`.
    pub fn find_document(&self, name: &str) -> Vec<(Project, DocumentUnit)> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|p| p.document(name).map(|d| (p.clone(), d.clone())))
            .collect()
    }

    /// Record `revision` as the last seen revision of `project` and persist it.
    pub fn update_revision(&self, project: &str, revision: &str) -> ConfigResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut doc = parse_file(&self.path)?;
        set_last_revision(&mut doc, project, revision)?;
        doc.autoformat();

        let tmp_path = self.path.with_extension("kdl.tmp");
        std::fs::write(&tmp_path, doc.to_string())?;
        std::fs::rename(&tmp_path, &self.path)?;

        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = projects.iter_mut().find(|p| p.name == project) {
            entry.last_revision = Some(revision.to_string());
        }

        debug!(project = %project, revision = %revision, "Persisted last revision");
        Ok(())
    }
}

fn parse_projects(doc: &KdlDocument, base_dir: &Path) -> ConfigResult<Vec<Project>> {
    let mut projects = Vec::new();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        if node.name().value() != "project" {
            continue;
        }
        let project = parse_project(node, base_dir)?;
        if !seen.insert(project.name.clone()) {
            return Err(ConfigError::Duplicate(format!("project '{}'", project.name)));
        }
        projects.push(project);
    }

    Ok(projects)
}

fn parse_project(node: &KdlNode, base_dir: &Path) -> ConfigResult<Project> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;

    let required = |field: &str| {
        child(node, field)
            .and_then(get_first_string_arg)
            .ok_or_else(|| ConfigError::MissingField(format!("{} for project '{}'", field, name)))
    };

    let repository = PathBuf::from(required("repository")?);
    let repository = if repository.is_relative() {
        base_dir.join(repository)
    } else {
        repository
    };
    let branch = required("branch")?;
    let last_revision = child(node, "last-revision").and_then(get_first_string_arg);
    let maintainer = child(node, "maintainer").and_then(get_first_string_arg);

    let formats = parse_formats(node, &name)?;

    let mut documents = Vec::new();
    for dc in child_strings(node, "documents") {
        if !is_valid_document_name(&dc) {
            return Err(ConfigError::InvalidValue {
                field: format!("documents of project '{}'", name),
                message: format!("'{}' is not a valid DC file name", dc),
            });
        }
        if documents.iter().any(|d: &DocumentUnit| d.name == dc) {
            return Err(ConfigError::Duplicate(format!(
                "document '{}' in project '{}'",
                dc, name
            )));
        }
        documents.push(load_dc_file(&repository, &dc, &formats)?);
    }

    let notifications = child(node, "notify")
        .map(|notify| Notifications {
            emails: child_strings(notify, "email"),
            irc: child_strings(notify, "irc"),
        })
        .unwrap_or_default();

    Ok(Project {
        name,
        repository,
        branch,
        last_revision,
        maintainer,
        documents,
        notifications,
    })
}

fn parse_formats(node: &KdlNode, project: &str) -> ConfigResult<Vec<OutputFormat>> {
    let raw = child_strings(node, "formats");
    if raw.is_empty() {
        return Ok(vec![OutputFormat::Pdf]);
    }

    let mut formats = Vec::new();
    for value in raw {
        let format = value
            .parse::<OutputFormat>()
            .map_err(|message| ConfigError::InvalidValue {
                field: format!("formats of project '{}'", project),
                message,
            })?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    Ok(formats)
}

fn set_last_revision(doc: &mut KdlDocument, project: &str, revision: &str) -> ConfigResult<()> {
    let node = doc
        .nodes_mut()
        .iter_mut()
        .find(|n| {
            n.name().value() == "project" && get_first_string_arg(n).as_deref() == Some(project)
        })
        .ok_or_else(|| ConfigError::UnknownProject(project.to_string()))?;

    let children = node.ensure_children();
    match children
        .nodes_mut()
        .iter_mut()
        .find(|c| c.name().value() == "last-revision")
    {
        Some(existing) => {
            existing.entries_mut().clear();
            existing.push(KdlEntry::new(revision));
        }
        None => {
            let mut rev_node = KdlNode::new("last-revision");
            rev_node.push(KdlEntry::new(revision));
            children.nodes_mut().push(rev_node);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_repo(root: &Path, name: &str, docs: &[(&str, &str)]) -> PathBuf {
        let repo = root.join(name);
        fs::create_dir_all(repo.join("xml")).unwrap();
        for (dc, rootid) in docs {
            fs::write(
                repo.join(dc),
                format!("MAIN=\"MAIN.xml\"\nROOTID=\"{}\"\n", rootid),
            )
            .unwrap();
        }
        repo
    }

    fn write_registry(root: &Path, content: &str) -> PathBuf {
        let path = root.join("projects.kdl");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_preserves_file_order() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "zeta", &[("DC-zeta", "book.zeta")]);
        write_repo(dir.path(), "alpha", &[("DC-alpha-a", "a"), ("DC-alpha-b", "b")]);
        let path = write_registry(
            dir.path(),
            r##"
            project "zeta" {
                repository "zeta"
                branch "main"
                documents "DC-zeta"
            }
            project "alpha" {
                repository "alpha"
                branch "develop"
                last-revision "abc123"
                documents "DC-alpha-a" "DC-alpha-b"
                formats "html" "pdf"
                notify {
                    email "docs@example.com"
                    irc "#docs"
                }
            }
            "##,
        );

        let registry = ProjectRegistry::load(&path).unwrap();
        let projects = registry.projects();
        let names: Vec<_> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let alpha = registry.project("alpha").unwrap();
        assert_eq!(alpha.branch, "develop");
        assert_eq!(alpha.last_revision.as_deref(), Some("abc123"));
        assert_eq!(alpha.documents.len(), 2);
        assert_eq!(alpha.documents[1].rootid.as_deref(), Some("b"));
        assert_eq!(
            alpha.documents[0].formats,
            vec![OutputFormat::Html, OutputFormat::Pdf]
        );
        assert_eq!(alpha.notifications.irc, vec!["#docs"]);
        assert_eq!(alpha.repository, dir.path().join("alpha"));

        let zeta = registry.project("zeta").unwrap();
        assert_eq!(zeta.documents[0].formats, vec![OutputFormat::Pdf]);
        assert!(zeta.last_revision.is_none());
    }

    #[test]
    fn test_missing_registry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProjectRegistry::load(dir.path().join("nope.kdl"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_malformed_registry_is_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_registry(dir.path(), "project \"x\" {\n repository \"a\"\n");
        let result = ProjectRegistry::load(&path);
        assert!(matches!(result, Err(ConfigError::Syntax { .. })));
    }

    #[test]
    fn test_invalid_document_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "repo", &[]);
        let path = write_registry(
            dir.path(),
            r#"
            project "p" {
                repository "repo"
                branch "main"
                documents "README"
            }
            "#,
        );
        let result = ProjectRegistry::load(&path);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_duplicate_project_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "repo", &[]);
        let path = write_registry(
            dir.path(),
            r#"
            project "p" {
                repository "repo"
                branch "main"
            }
            project "p" {
                repository "repo"
                branch "main"
            }
            "#,
        );
        let result = ProjectRegistry::load(&path);
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_update_revision_persists() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "repo", &[("DC-doc", "book")]);
        let path = write_registry(
            dir.path(),
            r#"
            project "p" {
                repository "repo"
                branch "main"
                documents "DC-doc"
            }
            "#,
        );

        let registry = ProjectRegistry::load(&path).unwrap();
        registry.update_revision("p", "deadbeef").unwrap();
        assert_eq!(
            registry.project("p").unwrap().last_revision.as_deref(),
            Some("deadbeef")
        );

        registry.update_revision("p", "cafebabe").unwrap();
        let reloaded = ProjectRegistry::load(&path).unwrap();
        assert_eq!(
            reloaded.project("p").unwrap().last_revision.as_deref(),
            Some("cafebabe")
        );
        assert_eq!(reloaded.project("p").unwrap().documents.len(), 1);
    }

    #[test]
    fn test_update_revision_unknown_project() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "repo", &[]);
        let path = write_registry(
            dir.path(),
            "project \"p\" {\n    repository \"repo\"\n    branch \"main\"\n}\n",
        );
        let registry = ProjectRegistry::load(&path).unwrap();
        let result = registry.update_revision("q", "abc");
        assert!(matches!(result, Err(ConfigError::UnknownProject(_))));
    }

    #[test]
    fn test_find_document_across_projects() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "one", &[("DC-shared", "a")]);
        write_repo(dir.path(), "two", &[("DC-shared", "b"), ("DC-own", "c")]);
        let path = write_registry(
            dir.path(),
            r#"
            project "one" {
                repository "one"
                branch "main"
                documents "DC-shared"
            }
            project "two" {
                repository "two"
                branch "main"
                documents "DC-shared" "DC-own"
            }
            "#,
        );
        let registry = ProjectRegistry::load(&path).unwrap();
        let found = registry.find_document("DC-shared");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0.name, "one");
        assert!(registry.find_document("DC-none").is_empty());
    }
}
