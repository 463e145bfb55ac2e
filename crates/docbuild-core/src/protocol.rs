//! Status/trigger wire protocol.
//!
//! Every request is a JSON object with a numeric `id` selecting the operation;
//! every response echoes that `id` next to the operation's payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::JobId;
use crate::job::JobStatus;

pub const MSG_STATUS: u64 = 1;
pub const MSG_TRIGGER_BUILD: u64 = 2;
pub const MSG_PROJECT_LIST: u64 = 3;
pub const MSG_VIEW_LOG: u64 = 4;

/// Reasons a request is rejected before it reaches a handler.
/// All of them close the connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request is not valid JSON")]
    Malformed,

    #[error("request has no numeric 'id'")]
    MissingId,

    #[error("unknown operation id {0}")]
    UnknownOperation(u64),

    #[error("invalid request for operation {0}")]
    InvalidRequest(u64),
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status,
    TriggerBuild {
        token: String,
        projects: Vec<String>,
        dc_files: Vec<String>,
    },
    ProjectList,
    ViewLog {
        dc_file: String,
        format: String,
    },
}

#[derive(Deserialize)]
struct TriggerPayload {
    token: String,
    projects: Vec<String>,
    dc_files: Vec<String>,
}

#[derive(Deserialize)]
struct ViewLogPayload {
    dc_file: String,
    format: String,
}

impl Request {
    /// Decode a text frame into `(id, request)`.
    pub fn parse(text: &str) -> Result<(u64, Request), ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingId)?;

        let request = match id {
            MSG_STATUS => Request::Status,
            MSG_TRIGGER_BUILD => {
                let payload: TriggerPayload = serde_json::from_value(value)
                    .map_err(|_| ProtocolError::InvalidRequest(id))?;
                Request::TriggerBuild {
                    token: payload.token,
                    projects: payload.projects,
                    dc_files: payload.dc_files,
                }
            }
            MSG_PROJECT_LIST => Request::ProjectList,
            MSG_VIEW_LOG => {
                let payload: ViewLogPayload = serde_json::from_value(value)
                    .map_err(|_| ProtocolError::InvalidRequest(id))?;
                Request::ViewLog {
                    dc_file: payload.dc_file,
                    format: payload.format,
                }
            }
            other => return Err(ProtocolError::UnknownOperation(other)),
        };

        Ok((id, request))
    }

    pub fn id(&self) -> u64 {
        match self {
            Request::Status => MSG_STATUS,
            Request::TriggerBuild { .. } => MSG_TRIGGER_BUILD,
            Request::ProjectList => MSG_PROJECT_LIST,
            Request::ViewLog { .. } => MSG_VIEW_LOG,
        }
    }

    /// Encode the request as a JSON text frame.
    pub fn to_json(&self) -> String {
        let mut body = Map::new();
        body.insert("id".to_string(), Value::from(self.id()));
        match self {
            Request::Status | Request::ProjectList => {}
            Request::TriggerBuild {
                token,
                projects,
                dc_files,
            } => {
                body.insert("token".to_string(), Value::from(token.clone()));
                body.insert("projects".to_string(), Value::from(projects.clone()));
                body.insert("dc_files".to_string(), Value::from(dc_files.clone()));
            }
            Request::ViewLog { dc_file, format } => {
                body.insert("dc_file".to_string(), Value::from(dc_file.clone()));
                body.insert("format".to_string(), Value::from(format.clone()));
            }
        }
        Value::Object(body).to_string()
    }
}

/// One job as exposed to status clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub project: String,
    pub dc_file: String,
    pub branch: String,
    pub commit: String,
    pub status: JobStatus,
    /// Unix timestamps.
    pub time_created: i64,
    pub time_started: Option<i64>,
    pub time_finished: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running_builds: usize,
    pub scheduled_builds: usize,
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub dc_files: Vec<String>,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectListResponse {
    /// Project name to its document units, in registry order.
    pub projects: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLogResponse {
    /// Base64 encoded log content.
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Build a response frame: the payload's fields plus the echoed `id`.
pub fn response<T: Serialize>(id: u64, payload: &T) -> Value {
    let mut body = Map::new();
    body.insert("id".to_string(), Value::from(id));
    if let Ok(Value::Object(fields)) = serde_json::to_value(payload) {
        body.extend(fields);
    }
    Value::Object(body)
}

/// Decode a response frame, surfacing an `error` payload as `Err`.
pub fn decode_response<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(error.to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(Request::parse(r#"{"id": 1}"#), Ok((1, Request::Status)));
    }

    #[test]
    fn test_parse_trigger() {
        let (id, request) = Request::parse(
            r#"{"id": 2, "token": "t", "projects": ["sles"], "dc_files": ["DC-a"]}"#,
        )
        .unwrap();
        assert_eq!(id, MSG_TRIGGER_BUILD);
        assert_eq!(
            request,
            Request::TriggerBuild {
                token: "t".to_string(),
                projects: vec!["sles".to_string()],
                dc_files: vec!["DC-a".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_rejections() {
        assert_eq!(Request::parse("not json"), Err(ProtocolError::Malformed));
        assert_eq!(Request::parse(r#"{"op": 1}"#), Err(ProtocolError::MissingId));
        assert_eq!(
            Request::parse(r#"{"id": 9}"#),
            Err(ProtocolError::UnknownOperation(9))
        );
        assert_eq!(
            Request::parse(r#"{"id": 2, "token": "t", "projects": "sles", "dc_files": []}"#),
            Err(ProtocolError::InvalidRequest(2))
        );
        assert_eq!(
            Request::parse(r#"{"id": 4, "dc_file": "DC-a"}"#),
            Err(ProtocolError::InvalidRequest(4))
        );
    }

    #[test]
    fn test_request_encoding_parses_back() {
        let request = Request::ViewLog {
            dc_file: "DC-a".to_string(),
            format: "pdf".to_string(),
        };
        assert_eq!(Request::parse(&request.to_json()), Ok((4, request)));
    }

    #[test]
    fn test_response_echoes_id() {
        let frame = response(
            2,
            &TriggerResponse {
                dc_files: vec![],
                projects: vec!["sles".to_string()],
            },
        );
        assert_eq!(frame["id"], 2);
        assert_eq!(frame["projects"][0], "sles");
    }

    #[test]
    fn test_decode_error_response() {
        let result: Result<TriggerResponse, String> =
            decode_response(r#"{"id": 2, "error": "Access denied! Unauthorized token!"}"#);
        assert_eq!(result.unwrap_err(), "Access denied! Unauthorized token!");
    }
}
