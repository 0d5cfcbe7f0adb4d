//! WebSocket client for a ComfyUI event stream.
//!
//! [`ComfyUIClient`] holds the WebSocket base URL of one ComfyUI instance.
//! Call [`ComfyUIClient::connect`] to open an [`EventStream`].

use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::error::EngineError;

/// The raw event stream of a ComfyUI connection.
pub type EventStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI event stream.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

impl ComfyUIClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8189`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// Generates a unique `client_id` (UUID v4) and appends it as a
    /// query parameter. Queue status broadcasts reach every client
    /// regardless of the id.
    pub async fn connect(&self) -> Result<EventStream, EngineError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) =
            connect_async(&url)
                .await
                .map_err(|e| EngineError::Connectivity {
                    operation: "subscribe",
                    detail: format!("Failed to connect to ComfyUI at {}: {e}", self.ws_url),
                    request_sent: false,
                })?;

        tracing::debug!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ws_stream)
    }
}

/// Map `http(s)://` to `ws(s)://`, leaving other schemes untouched.
pub fn ws_url_from_api(api_url: &str) -> String {
    let api_url = api_url.trim_end_matches('/');
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}
