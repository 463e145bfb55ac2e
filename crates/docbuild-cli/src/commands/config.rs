//! Configuration property commands.

use anyhow::Result;
use docbuild_config::{SystemConfig, set_property};
use std::path::Path;

pub fn get(config: &SystemConfig, key: &str) -> Result<()> {
    println!("{}", config.get_property(key)?);
    Ok(())
}

pub fn set(path: &Path, key: &str, value: &str) -> Result<()> {
    set_property(path, key, value)?;
    println!("{} = {}", key, value);
    Ok(())
}

pub fn list(config: &SystemConfig) -> Result<()> {
    for key in SystemConfig::property_names() {
        println!("{} = {}", key, config.get_property(key)?);
    }
    Ok(())
}
