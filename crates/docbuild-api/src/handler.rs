//! Request handling for the status/trigger protocol.
//!
//! Every text frame is one request. Well-formed requests are always answered,
//! possibly with an `{"error": ...}` payload; anything that does not parse as
//! a request closes the connection.

use crate::error::ApiError;
use crate::state::AppState;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use docbuild_core::artifact::latest_failure_log;
use docbuild_core::project::{OutputFormat, is_valid_document_name};
use docbuild_core::protocol::{
    ProjectListResponse, ProtocolError, Request, TriggerResponse, ViewLogResponse, response,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// What to do with the connection after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(Value),
    Close(ProtocolError),
}

pub async fn handle_message(state: &AppState, text: &str) -> Outcome {
    let (id, request) = match Request::parse(text) {
        Ok(parsed) => parsed,
        Err(e) => return Outcome::Close(e),
    };

    let payload = match handle_request(state, request).await {
        Ok(payload) => payload,
        Err(e) => {
            debug!(id, error = %e, "Request rejected");
            to_value(&e.to_payload())
        }
    };

    Outcome::Reply(response(id, &payload))
}

async fn handle_request(state: &AppState, request: Request) -> Result<Value, ApiError> {
    match request {
        Request::Status => Ok(to_value(&state.daemon.status().report())),
        Request::TriggerBuild {
            token,
            projects,
            dc_files,
        } => trigger(state, &token, &projects, &dc_files).await,
        Request::ProjectList => Ok(to_value(&project_list(state))),
        Request::ViewLog { dc_file, format } => view_log(state, &dc_file, &format).await,
    }
}

async fn trigger(
    state: &AppState,
    token: &str,
    projects: &[String],
    dc_files: &[String],
) -> Result<Value, ApiError> {
    if !state.tokens.is_authorized(token) {
        warn!("Trigger with unauthorized token");
        return Err(ApiError::Unauthorized);
    }

    let projects = state.daemon.trigger_projects(projects).await;
    let dc_files = state.daemon.trigger_documents(dc_files).await;
    info!(projects = ?projects, dc_files = ?dc_files, "Builds triggered");

    Ok(to_value(&TriggerResponse { dc_files, projects }))
}

fn project_list(state: &AppState) -> ProjectListResponse {
    let mut projects = Map::new();
    for project in state.daemon.registry().projects() {
        let documents: Vec<Value> = project
            .documents
            .iter()
            .map(|d| Value::from(d.name.clone()))
            .collect();
        projects.insert(project.name, Value::Array(documents));
    }
    ProjectListResponse { projects }
}

async fn view_log(state: &AppState, dc_file: &str, format: &str) -> Result<Value, ApiError> {
    if !is_valid_document_name(dc_file) {
        return Err(ApiError::InvalidDocument);
    }
    let format: OutputFormat = format.parse().map_err(|_| ApiError::InvalidFormat)?;

    let path = match latest_failure_log(&state.logs_dir, dc_file, format) {
        Ok(Some(path)) => path,
        Ok(None) => return Err(ApiError::LogNotFound),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::LogNotFound),
        Err(e) => return Err(e.into()),
    };

    let content = tokio::fs::read(&path).await?;
    Ok(to_value(&ViewLogResponse {
        log: STANDARD.encode(content),
    }))
}

fn to_value<T: serde::Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
