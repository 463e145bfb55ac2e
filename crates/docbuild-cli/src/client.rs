//! Blocking WebSocket client for the daemon's API server.

use docbuild_core::exit::FatalError;
use docbuild_core::protocol::Request;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::net::TcpStream;
use thiserror::Error;
use tracing::debug;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    /// The server answered with an `{"error": ...}` payload.
    #[error("{0}")]
    Server(String),
}

pub struct ApiClient {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl ApiClient {
    pub fn connect(host: &str, port: u16) -> Result<Self, FatalError> {
        let url = format!("ws://{}:{}/", host, port);
        debug!(url = %url, "Connecting to API server");
        let (socket, _) = tungstenite::connect(url.as_str())
            .map_err(|e| FatalError::ApiConnectionFailed(format!("{}: {}", url, e)))?;
        Ok(Self { socket })
    }

    /// Send `request` and decode the reply.
    pub fn request<T: DeserializeOwned>(&mut self, request: &Request) -> Result<T, ClientError> {
        self.socket
            .send(Message::Text(request.to_json().into()))
            .map_err(closed)?;

        loop {
            match self.socket.read().map_err(closed)? {
                Message::Text(text) => return decode(request.id(), text.as_str()),
                Message::Close(_) => return Err(FatalError::ApiConnectionClosed.into()),
                Message::Binary(_) => {
                    return Err(FatalError::ApiInvalidData("binary frame".to_string()).into());
                }
                _ => continue,
            }
        }
    }
}

impl Drop for ApiClient {
    fn drop(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

fn closed(e: tungstenite::Error) -> ClientError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            FatalError::ApiConnectionClosed.into()
        }
        other => FatalError::ApiConnectionFailed(other.to_string()).into(),
    }
}

/// Decode a reply frame, checking that it answers operation `id`.
pub fn decode<T: DeserializeOwned>(id: u64, text: &str) -> Result<T, ClientError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FatalError::ApiInvalidData(e.to_string()))?;
    if value.get("id").and_then(Value::as_u64) != Some(id) {
        return Err(FatalError::ApiInvalidData(format!("reply does not answer request {}", id)).into());
    }
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(ClientError::Server(error.to_string()));
    }
    serde_json::from_value(value).map_err(|e| FatalError::ApiInvalidData(e.to_string()).into())
}
