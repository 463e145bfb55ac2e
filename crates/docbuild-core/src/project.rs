//! Tracked documentation projects and their buildable document units.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Valid document unit (DC file) names.
static DOCUMENT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^DC-[a-zA-Z0-9_-]+$").unwrap());

/// Prefix every document unit name starts with.
pub const DOCUMENT_PREFIX: &str = "DC-";

/// Check whether `name` is a well-formed document unit name.
pub fn is_valid_document_name(name: &str) -> bool {
    DOCUMENT_NAME_REGEX.is_match(name)
}

/// Output format a document can be rendered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Html,
    SingleHtml,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [
        OutputFormat::Html,
        OutputFormat::SingleHtml,
        OutputFormat::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::SingleHtml => "single_html",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" => Ok(OutputFormat::Html),
            "single_html" => Ok(OutputFormat::SingleHtml),
            "pdf" => Ok(OutputFormat::Pdf),
            _ => Err(format!(
                "Format is not valid. Please choose between: html, single_html, and pdf (got '{}')",
                s
            )),
        }
    }
}

/// One buildable document within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUnit {
    /// DC file name, e.g. `DC-SLES-admin`.
    pub name: String,
    /// MAIN file of the document, relative to the repository's `xml/` directory.
    pub main: String,
    /// Dependency scope (ROOTID). `None` means the whole repository.
    pub rootid: Option<String>,
    /// Formats to render.
    pub formats: Vec<OutputFormat>,
}

impl DocumentUnit {
    /// Name without the `DC-` prefix, used in artifact names.
    pub fn suffix(&self) -> &str {
        self.name.strip_prefix(DOCUMENT_PREFIX).unwrap_or(&self.name)
    }

    /// Path of the MAIN file relative to the repository root.
    pub fn main_path(&self) -> String {
        format!("xml/{}", self.main)
    }

    pub fn is_scoped(&self) -> bool {
        self.rootid.is_some()
    }
}

/// Where a project wants to hear about build outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifications {
    pub emails: Vec<String>,
    pub irc: Vec<String>,
}

impl Notifications {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.irc.is_empty()
    }
}

/// A tracked documentation source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project name.
    pub name: String,
    /// Local checkout of the repository.
    pub repository: PathBuf,
    /// Branch to track.
    pub branch: String,
    /// Last revision a build was scheduled for.
    pub last_revision: Option<String>,
    pub maintainer: Option<String>,
    pub documents: Vec<DocumentUnit>,
    pub notifications: Notifications,
}

impl Project {
    pub fn document(&self, name: &str) -> Option<&DocumentUnit> {
        self.documents.iter().find(|d| d.name == name)
    }

    /// Last path component of the repository checkout.
    pub fn repo_dir_name(&self) -> String {
        self.repository
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> DocumentUnit {
        DocumentUnit {
            name: name.to_string(),
            main: "book.xml".to_string(),
            rootid: None,
            formats: vec![OutputFormat::Pdf],
        }
    }

    #[test]
    fn test_document_name_validation() {
        assert!(is_valid_document_name("DC-SLES-admin"));
        assert!(is_valid_document_name("DC-opensuse_start"));
        assert!(!is_valid_document_name("SLES-admin"));
        assert!(!is_valid_document_name("DC-"));
        assert!(!is_valid_document_name("DC-../etc/passwd"));
    }

    #[test]
    fn test_output_format_round_trip() {
        for format in OutputFormat::ALL {
            assert_eq!(format.as_str().parse::<OutputFormat>().unwrap(), format);
        }
        assert!("epub".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_document_suffix_and_main_path() {
        let doc = unit("DC-SLES-admin");
        assert_eq!(doc.suffix(), "SLES-admin");
        assert_eq!(doc.main_path(), "xml/book.xml");
        assert!(!doc.is_scoped());
    }

    #[test]
    fn test_project_repo_dir_name() {
        let project = Project {
            name: "sles".to_string(),
            repository: PathBuf::from("/srv/repos/doc-sle/"),
            branch: "develop".to_string(),
            last_revision: None,
            maintainer: None,
            documents: vec![unit("DC-SLES-admin")],
            notifications: Notifications::default(),
        };
        assert_eq!(project.repo_dir_name(), "doc-sle");
        assert!(project.document("DC-SLES-admin").is_some());
        assert!(project.document("DC-other").is_none());
    }
}
