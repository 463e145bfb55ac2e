//! docbuild daemon

use clap::Parser;
use docbuild_config::{SystemConfig, default_config_path};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docbuild-daemon")]
#[command(about = "Watches documentation repositories and builds changed documents")]
#[command(version)]
struct Args {
    /// Path to the system configuration
    #[arg(short, long, env = "DOCBUILD_CONFIG")]
    config: Option<PathBuf>,

    /// Record environment ids in build info
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let path = args.config.unwrap_or_else(default_config_path);

    let mut config = match SystemConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            let fatal = e.into_system_fatal();
            error!(path = %path.display(), error = %fatal, "Invalid configuration");
            std::process::exit(fatal.code());
        }
    };
    config.daemon.debug |= args.debug;

    if let Err(e) = docbuild_api::server::run(config).await {
        error!(error = %e, "Daemon failed");
        std::process::exit(e.exit_code());
    }
}
