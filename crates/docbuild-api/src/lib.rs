//! Status and trigger server for docbuild.
//!
//! Serves the JSON request/response protocol over a WebSocket and hosts the
//! daemon start-up sequence shared by `docbuild-daemon` and `docbuild daemon`.

pub mod error;
pub mod handler;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use server::LaunchError;
pub use state::AppState;
