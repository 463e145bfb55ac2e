//! Foreground daemon.

use docbuild_config::SystemConfig;
use tracing::error;

pub fn run(mut config: SystemConfig, debug: bool) -> Result<(), i32> {
    config.daemon.debug |= debug;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| {
        eprintln!("Error: failed to start runtime: {}", e);
        1
    })?;

    runtime
        .block_on(docbuild_api::server::run(config))
        .map_err(|e| {
            error!(error = %e, "Daemon failed");
            eprintln!("Error: {}", e);
            e.exit_code()
        })
}
