//! Token commands.

use anyhow::{Context, Result};
use docbuild_config::{SystemConfig, TokenStore, generate_token, validate_token};
use std::path::Path;

/// This client's token, if one was created.
pub fn client_token(config: &SystemConfig) -> Result<Option<String>> {
    read_token(&config.token_path())
}

fn read_token(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let token = content.trim().to_string();
            validate_token(&token).with_context(|| format!("invalid token in {}", path.display()))?;
            Ok(Some(token))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn write_token(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", token))
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn show(config: &SystemConfig) -> Result<()> {
    let path = config.token_path();
    let token = match read_token(&path)? {
        Some(token) => token,
        None => {
            let token = generate_token();
            write_token(&path, &token)?;
            token
        }
    };
    println!("{}", token);
    Ok(())
}

pub fn regenerate(config: &SystemConfig) -> Result<()> {
    let token = generate_token();
    write_token(&config.token_path(), &token)?;
    println!("{}", token);
    Ok(())
}

pub fn authorize(config: &SystemConfig, token: &str) -> Result<()> {
    TokenStore::new(&config.paths.auth).authorize(token)?;
    println!("Token authorized");
    Ok(())
}

pub fn deauthorize(config: &SystemConfig, token: &str) -> Result<()> {
    TokenStore::new(&config.paths.auth).deauthorize(token)?;
    println!("Token deauthorized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home/token");
        assert!(read_token(&path).unwrap().is_none());

        let token = generate_token();
        write_token(&path, &token).unwrap();
        assert_eq!(read_token(&path).unwrap(), Some(token));
    }

    #[test]
    fn test_corrupt_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "short").unwrap();
        assert!(read_token(&path).is_err());
    }
}
