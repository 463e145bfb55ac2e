//! Application state.

use docbuild_config::TokenStore;
use docbuild_scheduler::Daemon;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub daemon: Arc<Daemon>,
    pub tokens: Arc<TokenStore>,
    /// Where failure logs are looked up.
    pub logs_dir: PathBuf,
}

impl AppState {
    pub fn new(daemon: Arc<Daemon>, tokens: Arc<TokenStore>, logs_dir: PathBuf) -> Self {
        Self {
            daemon,
            tokens,
            logs_dir,
        }
    }
}
