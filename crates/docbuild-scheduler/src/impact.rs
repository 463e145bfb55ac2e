//! Decides which document units a set of changed files affects.
//!
//! Unscoped documents rebuild on every change. A scoped document (one with a
//! ROOTID) rebuilds only when a changed file lies inside the part of the
//! DocBook tree below the element carrying that id.

use crate::watcher::ChangedFiles;
use docbuild_core::project::{DocumentUnit, Project};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ImpactError {
    #[error("ROOTID '{rootid}' of {document} not found")]
    InvalidScope { document: String, rootid: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error in {}: {message}", path.display())]
    Xml { path: PathBuf, message: String },
}

/// Files a scoped document depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Repository-relative paths of included sources.
    pub paths: BTreeSet<String>,
    /// Bare file names of referenced images, which live in format-specific directories.
    pub file_names: BTreeSet<String>,
}

impl Scope {
    pub fn contains(&self, changed: &str) -> bool {
        if self.paths.contains(changed) {
            return true;
        }
        Path::new(changed)
            .file_name()
            .map(|name| self.file_names.contains(name.to_string_lossy().as_ref()))
            .unwrap_or(false)
    }
}

/// Resolves the dependency scope of a document unit.
pub trait ScopeResolver: Send + Sync {
    fn resolve(&self, repository: &Path, unit: &DocumentUnit) -> Result<Scope, ImpactError>;
}

/// Filters document units by the files a revision changed.
pub struct ChangeImpactFilter {
    resolver: Arc<dyn ScopeResolver>,
}

impl ChangeImpactFilter {
    pub fn new(resolver: Arc<dyn ScopeResolver>) -> Self {
        Self { resolver }
    }

    /// Whether `unit` must be rebuilt for `changed`.
    pub fn needs_build(
        &self,
        repository: &Path,
        unit: &DocumentUnit,
        changed: &ChangedFiles,
    ) -> Result<bool, ImpactError> {
        if !unit.is_scoped() {
            return Ok(true);
        }

        let scope = self.resolver.resolve(repository, unit)?;
        Ok(match changed {
            ChangedFiles::Unknown => true,
            ChangedFiles::Known(files) => files.iter().any(|f| scope.contains(f)),
        })
    }

    /// Documents of `project` affected by `changed`. Units whose scope cannot be
    /// resolved are logged and left out.
    pub fn affected<'a>(
        &self,
        project: &'a Project,
        changed: &ChangedFiles,
    ) -> Vec<&'a DocumentUnit> {
        project
            .documents
            .iter()
            .filter(|unit| {
                match self.needs_build(&project.repository, unit, changed) {
                    Ok(build) => {
                        debug!(project = %project.name, document = %unit.name, build, "Impact evaluated");
                        build
                    }
                    Err(e) => {
                        error!(project = %project.name, document = %unit.name, error = %e, "Skipping document");
                        false
                    }
                }
            })
            .collect()
    }
}

/// Walks DocBook sources with XInclude to find the files below a ROOTID.
#[derive(Debug, Default, Clone)]
pub struct DocBookScopeResolver;

impl ScopeResolver for DocBookScopeResolver {
    fn resolve(&self, repository: &Path, unit: &DocumentUnit) -> Result<Scope, ImpactError> {
        let Some(rootid) = unit.rootid.as_deref() else {
            return Ok(Scope::default());
        };

        let main = repository.join(unit.main_path());
        let mut walker = Walker {
            repository,
            visited: HashSet::new(),
        };

        walker
            .find(&main, rootid)?
            .ok_or_else(|| ImpactError::InvalidScope {
                document: unit.name.clone(),
                rootid: rootid.to_string(),
            })
    }
}

struct Walker<'a> {
    repository: &'a Path,
    visited: HashSet<PathBuf>,
}

enum Reference {
    Include(PathBuf),
    /// `parse="text"` include: a dependency, but not XML.
    Text(PathBuf),
    Image(String),
}

impl Walker<'_> {
    /// Search `file` and its includes for the element `rootid`; returns its scope.
    fn find(&mut self, file: &Path, rootid: &str) -> Result<Option<Scope>, ImpactError> {
        if !self.visited.insert(file.to_path_buf()) {
            return Ok(None);
        }

        let content = read(file)?;
        let mut reader = Reader::from_str(&content);
        let mut depth = 0usize;
        let mut capture: Option<(usize, Scope)> = None;
        let mut includes = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| ImpactError::Xml {
                path: file.to_path_buf(),
                message: format!("at position {}: {}", reader.error_position(), e),
            })?;

            match event {
                Event::Start(ref elem) | Event::Empty(ref elem) => {
                    let is_start = matches!(event, Event::Start(_));

                    if capture.is_none() && element_id(elem).as_deref() == Some(rootid) {
                        let mut scope = Scope::default();
                        scope.paths.insert(self.relative(file));
                        capture = Some((depth, scope));
                    }

                    if let Some(reference) = reference(file, elem) {
                        match capture.as_mut() {
                            Some((_, scope)) => self.collect(reference, scope)?,
                            None => {
                                if let Reference::Include(path) = reference {
                                    includes.push(path);
                                }
                            }
                        }
                    }

                    if is_start {
                        depth += 1;
                    } else if matches!(capture, Some((start, _)) if start == depth) {
                        return Ok(capture.map(|(_, scope)| scope));
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if matches!(capture, Some((start, _)) if start == depth) {
                        return Ok(capture.map(|(_, scope)| scope));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some((_, scope)) = capture {
            return Ok(Some(scope));
        }

        for include in includes {
            if let Some(scope) = self.find(&include, rootid)? {
                return Ok(Some(scope));
            }
        }
        Ok(None)
    }

    /// Add `reference` and, for includes, everything the included file references.
    fn collect(&mut self, found: Reference, scope: &mut Scope) -> Result<(), ImpactError> {
        match found {
            Reference::Image(name) => {
                scope.file_names.insert(name);
            }
            Reference::Text(path) => {
                scope.paths.insert(self.relative(&path));
            }
            Reference::Include(path) => {
                if !scope.paths.insert(self.relative(&path)) || !path.exists() {
                    return Ok(());
                }
                let content = read(&path)?;
                let mut reader = Reader::from_str(&content);
                loop {
                    let event = reader.read_event().map_err(|e| ImpactError::Xml {
                        path: path.clone(),
                        message: format!("at position {}: {}", reader.error_position(), e),
                    })?;
                    match event {
                        Event::Start(ref elem) | Event::Empty(ref elem) => {
                            if let Some(nested) = reference(&path, elem) {
                                self.collect(nested, scope)?;
                            }
                        }
                        Event::Eof => break,
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(self.repository)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

fn read(path: &Path) -> Result<String, ImpactError> {
    std::fs::read_to_string(path).map_err(|source| ImpactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn attribute(elem: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

/// `xml:id` (DocBook 5) or `id` (DocBook 4).
fn element_id(elem: &BytesStart<'_>) -> Option<String> {
    attribute(elem, b"id")
}

fn reference(file: &Path, elem: &BytesStart<'_>) -> Option<Reference> {
    match elem.local_name().as_ref() {
        b"include" => {
            let href = attribute(elem, b"href")?;
            let base = file.parent().unwrap_or(Path::new(""));
            let path = normalize(&base.join(href));
            if attribute(elem, b"parse").as_deref() == Some("text") {
                Some(Reference::Text(path))
            } else {
                Some(Reference::Include(path))
            }
        }
        _ => attribute(elem, b"fileref").map(|fileref| {
            let name = Path::new(&fileref)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or(fileref);
            Reference::Image(name)
        }),
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
