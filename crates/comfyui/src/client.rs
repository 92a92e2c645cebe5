//! WebSocket client for the worker's event stream.
//!
//! [`ComfyUIClient`] holds the connection configuration for the worker.
//! Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream type produced by [`ComfyUIClient::connect`].
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the worker's streaming endpoint.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    auth_token: Option<String>,
}

/// A live WebSocket connection to the worker.
pub struct ComfyUIConnection {
    /// Client ID sent during the handshake. Identifies the stream only;
    /// submissions use their own per-request IDs.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// Create a client targeting `ws_url`, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url,
            auth_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` during the handshake.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the worker's WebSocket endpoint.
    ///
    /// Generates a unique `client_id` (UUID v4) and appends it as a
    /// query parameter, as ComfyUI expects.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let mut request = url
            .into_client_request()
            .map_err(|e| ComfyUIClientError::InvalidRequest(e.to_string()))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ComfyUIClientError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to worker at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %client_id,
            authenticated = self.auth_token.is_some(),
            "Connected to worker at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The URL or auth header could not be turned into a handshake request.
    #[error("Invalid handshake request: {0}")]
    InvalidRequest(String),
}
