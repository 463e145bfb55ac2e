//! Naming and lookup of build artifacts and failure logs.
//!
//! Artifacts land in the builds directory as
//! `{unix_timestamp}_{document_suffix}_{format}.tar.gz`; failure logs land in the
//! logs directory as `build_fail_{document}_{format}_{unix_timestamp}.log`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::project::{DocumentUnit, OutputFormat};

/// File name of a rendered artifact archive.
pub fn artifact_file_name(timestamp: i64, unit: &DocumentUnit, format: OutputFormat) -> String {
    format!("{}_{}_{}.tar.gz", timestamp, unit.suffix(), format)
}

/// File name of a persisted failure log.
pub fn failure_log_file_name(document: &str, format: OutputFormat, timestamp: i64) -> String {
    format!("build_fail_{}_{}_{}.log", document, format, timestamp)
}

/// Find the most recent failure log for `(document, format)` in `logs_dir`.
pub fn latest_failure_log(
    logs_dir: &Path,
    document: &str,
    format: OutputFormat,
) -> std::io::Result<Option<PathBuf>> {
    let pattern = Regex::new(&format!(
        r"^build_fail_{}_{}_([0-9]+)\.log$",
        regex::escape(document),
        regex::escape(format.as_str())
    ))
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in std::fs::read_dir(logs_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(caps) = pattern.captures(&file_name) else {
            continue;
        };
        let Ok(timestamp) = caps[1].parse::<u64>() else {
            continue;
        };
        if latest.as_ref().is_none_or(|(best, _)| timestamp > *best) {
            latest = Some((timestamp, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Build information stored as `build_info.json` inside every artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    pub project: String,
    pub dc_file: String,
    pub format: OutputFormat,
    pub revision: String,
    pub branch: String,
    pub build_status: bool,
    /// Seconds spent rendering.
    pub compile_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub productnumber: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guide: Option<String>,
    /// Environment the build ran in; only recorded in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}
