//! Authorized bearer tokens.
//!
//! The store is a KDL file:
//!
//! ```kdl
//! tokens {
//!     token "3mXq0uY7c4s8vJ1kR2bN5pT9wZ6aE0dF"
//! }
//! ```

use crate::kdl_util::{child_strings, parse_file};
use crate::ConfigError;
use kdl::{KdlDocument, KdlEntry, KdlNode};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

/// Length of every token.
pub const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token must be exactly {TOKEN_LENGTH} characters long, got {0}")]
    InvalidLength(usize),

    #[error("token may only contain the characters A-Z, a-z and 0-9")]
    InvalidCharacters,

    #[error("token is already authorized")]
    AlreadyAuthorized,

    #[error("token is not authorized")]
    NotAuthorized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Generate a fresh random token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Check length and alphabet of `token`.
pub fn validate_token(token: &str) -> Result<(), AuthError> {
    let length = token.chars().count();
    if length != TOKEN_LENGTH {
        return Err(AuthError::InvalidLength(length));
    }
    if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AuthError::InvalidCharacters);
    }
    Ok(())
}

/// File-backed set of authorized tokens.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Open the store, failing if an existing file cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let store = Self::new(path);
        store.tokens()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current tokens, read from disk. A missing file is an empty store.
    pub fn tokens(&self) -> Result<Vec<String>, AuthError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let doc = parse_file(&self.path)?;
        Ok(doc
            .nodes()
            .iter()
            .filter(|n| n.name().value() == "tokens")
            .flat_map(|n| child_strings(n, "token"))
            .collect())
    }

    /// Whether `token` is authorized. Unreadable stores authorize nothing.
    pub fn is_authorized(&self, token: &str) -> bool {
        match self.tokens() {
            Ok(tokens) => tokens.iter().any(|t| t == token),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token store");
                false
            }
        }
    }

    pub fn authorize(&self, token: &str) -> Result<(), AuthError> {
        validate_token(token)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut tokens = self.tokens()?;
        if tokens.iter().any(|t| t == token) {
            return Err(AuthError::AlreadyAuthorized);
        }
        tokens.push(token.to_string());
        self.write(&tokens)?;

        info!("Authorized token");
        Ok(())
    }

    pub fn deauthorize(&self, token: &str) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut tokens = self.tokens()?;
        let before = tokens.len();
        tokens.retain(|t| t != token);
        if tokens.len() == before {
            return Err(AuthError::NotAuthorized);
        }
        self.write(&tokens)?;

        info!("Deauthorized token");
        Ok(())
    }

    fn write(&self, tokens: &[String]) -> Result<(), AuthError> {
        let mut section = KdlNode::new("tokens");
        let children = section.ensure_children();
        for token in tokens {
            let mut node = KdlNode::new("token");
            node.push(KdlEntry::new(token.as_str()));
            children.nodes_mut().push(node);
        }

        let mut doc = KdlDocument::new();
        doc.nodes_mut().push(section);
        doc.autoformat();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("kdl.tmp");
        std::fs::write(&tmp_path, doc.to_string())?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("auth.kdl"));
        (dir, store)
    }

    #[test]
    fn test_generated_tokens_are_valid() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(validate_token(&token).is_ok());
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_short_token_rejected() {
        let (_dir, store) = store();
        let token = "a".repeat(31);
        assert!(matches!(
            store.authorize(&token),
            Err(AuthError::InvalidLength(31))
        ));
    }

    #[test]
    fn test_bad_characters_rejected() {
        let (_dir, store) = store();
        let token = format!("{}!", "a".repeat(31));
        assert!(matches!(
            store.authorize(&token),
            Err(AuthError::InvalidCharacters)
        ));
    }

    #[test]
    fn test_duplicate_authorize_rejected() {
        let (_dir, store) = store();
        let token = generate_token();
        store.authorize(&token).unwrap();
        assert!(matches!(
            store.authorize(&token),
            Err(AuthError::AlreadyAuthorized)
        ));
        assert_eq!(store.tokens().unwrap(), vec![token]);
    }

    #[test]
    fn test_deauthorize() {
        let (_dir, store) = store();
        let keep = generate_token();
        let drop = generate_token();
        store.authorize(&keep).unwrap();
        store.authorize(&drop).unwrap();

        store.deauthorize(&drop).unwrap();
        assert!(store.is_authorized(&keep));
        assert!(!store.is_authorized(&drop));
        assert!(matches!(
            store.deauthorize(&drop),
            Err(AuthError::NotAuthorized)
        ));
    }

    #[test]
    fn test_changes_from_other_writers_are_seen() {
        let (dir, store) = store();
        let other = TokenStore::new(dir.path().join("auth.kdl"));
        let token = generate_token();
        assert!(!store.is_authorized(&token));
        other.authorize(&token).unwrap();
        assert!(store.is_authorized(&token));
    }

    #[test]
    fn test_open_rejects_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.kdl");
        std::fs::write(&path, "tokens {").unwrap();
        assert!(TokenStore::open(&path).is_err());
    }
}
