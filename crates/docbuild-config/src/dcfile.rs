//! DC file parsing.
//!
//! A DC file is a shell-style `KEY="value"` file describing one document. Only
//! `MAIN` (required) and `ROOTID` (optional dependency scope) matter here.

use crate::{ConfigError, ConfigResult};
use docbuild_core::project::{DocumentUnit, OutputFormat};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static MAIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*MAIN\s*=\s*(.*)$").unwrap());
static ROOTID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*ROOTID\s*=\s*(.*)$").unwrap());

/// Read `{repository}/{name}` and turn it into a document unit.
pub fn load_dc_file(
    repository: &Path,
    name: &str,
    formats: &[OutputFormat],
) -> ConfigResult<DocumentUnit> {
    let path = repository.join(name);
    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::DocumentUnit {
        path: path.clone(),
        message: e.to_string(),
    })?;

    parse_dc_content(name, &content, formats).map_err(|message| ConfigError::DocumentUnit {
        path,
        message,
    })
}

/// Parse the content of a DC file.
pub fn parse_dc_content(
    name: &str,
    content: &str,
    formats: &[OutputFormat],
) -> Result<DocumentUnit, String> {
    let mut main = None;
    let mut rootid = None;

    for line in content.lines() {
        if let Some(caps) = MAIN_REGEX.captures(line) {
            main = Some(unquote(&caps[1]));
        } else if let Some(caps) = ROOTID_REGEX.captures(line) {
            rootid = Some(unquote(&caps[1]));
        }
    }

    let main = main
        .filter(|m| !m.is_empty())
        .ok_or_else(|| "no MAIN entry found".to_string())?;

    Ok(DocumentUnit {
        name: name.to_string(),
        main,
        rootid: rootid.filter(|r| !r.is_empty()),
        formats: formats.to_vec(),
    })
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    value.to_string()
}
