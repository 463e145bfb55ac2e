//! Registry validation.

use anyhow::Result;
use docbuild_config::{ConfigError, ProjectRegistry, SystemConfig};
use std::path::PathBuf;

pub fn run(config: &SystemConfig, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| config.paths.projects.clone());
    let registry = ProjectRegistry::load(&path).map_err(ConfigError::into_registry_fatal)?;

    let projects = registry.projects();
    for project in &projects {
        println!(
            "{}: {} on {} ({} DC files)",
            project.name,
            project.repository.display(),
            project.branch,
            project.documents.len()
        );
    }
    println!("Registry is valid: {} projects", projects.len());
    Ok(())
}
