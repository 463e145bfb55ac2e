//! Daemon start-up: prerequisites, loops and the API listener.

use crate::routes;
use crate::shutdown::install_shutdown_handler;
use crate::state::AppState;
use docbuild_config::{ConfigError, ProjectRegistry, SystemConfig, TokenStore};
use docbuild_core::environment::EnvironmentProvider;
use docbuild_core::exit::FatalError;
use docbuild_executor::DockerProvider;
use docbuild_scheduler::{
    BuildWorker, Daemon, DaemonOptions, GitCli, JobQueue, WorkerSettings,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("API server error: {0}")]
    Serve(std::io::Error),
}

impl LaunchError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Fatal(e) => e.code(),
            LaunchError::Bind { .. } | LaunchError::Serve(_) => 1,
        }
    }
}

/// Run the daemon until SIGINT or SIGTERM.
pub async fn run(config: SystemConfig) -> Result<(), LaunchError> {
    config
        .ensure_dirs()
        .map_err(ConfigError::into_system_fatal)?;

    let registry = ProjectRegistry::load(&config.paths.projects)
        .map_err(ConfigError::into_registry_fatal)?;

    let provider = check_environment(&config).await?;

    let tokens = TokenStore::open(&config.paths.auth)
        .map_err(|e| FatalError::AuthFile(e.to_string()))?;

    let worker = BuildWorker::new(Arc::new(provider), WorkerSettings::from_config(&config));
    let daemon = Arc::new(Daemon::new(
        Arc::new(registry),
        Arc::new(JobQueue::new(config.daemon.history)),
        Arc::new(GitCli::new()),
        Arc::new(worker),
        DaemonOptions::from_config(&config),
    ));

    if !daemon.verify_projects().await {
        return Err(FatalError::InvalidRepository(
            "one or more project repositories are not usable".to_string(),
        )
        .into());
    }

    let token = install_shutdown_handler();

    let server = if config.api.enabled {
        let addr = config.api.listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LaunchError::Bind { addr, source })?;
        info!(addr = %addr, "API server listening");

        let state = AppState::new(daemon.clone(), Arc::new(tokens), config.logs_dir());
        let app = routes::router(state).layer(TraceLayer::new_for_http());
        let shutdown = token.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }))
    } else {
        info!("API server disabled");
        None
    };

    daemon.run(token).await;

    if let Some(server) = server {
        match server.await {
            Ok(result) => result.map_err(LaunchError::Serve)?,
            Err(e) => error!(error = %e, "API server task panicked"),
        }
    }

    Ok(())
}

/// Docker must answer and the render image must be present locally.
async fn check_environment(config: &SystemConfig) -> Result<DockerProvider, FatalError> {
    let provider =
        DockerProvider::new().map_err(|e| FatalError::EnvironmentUnavailable(e.to_string()))?;
    provider
        .ping()
        .await
        .map_err(|e| FatalError::EnvironmentUnavailable(e.to_string()))?;

    let image = &config.container.image;
    let available = provider
        .image_available(image)
        .await
        .map_err(|e| FatalError::EnvironmentUnavailable(e.to_string()))?;
    if !available {
        return Err(FatalError::ImageMissing(image.clone()));
    }

    info!(provider = provider.name(), image = %image, "Build environment ready");
    Ok(provider)
}
