//! WebSocket connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};

use crate::{Connector, Duplex, Handshake, TransportError};

/// Connector speaking JSON text frames over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a WebSocket connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, handshake: &Handshake) -> Result<Duplex, TransportError> {
        let url = handshake.url()?;
        tracing::debug!(
            session_id = %handshake.session_id,
            host = ?url.host_str(),
            "Opening WebSocket"
        );

        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (sender, receiver) = socket.split();

        let sink = sender
            .sink_map_err(map_ws_error)
            .with(|frame: String| future::ready(Ok::<_, TransportError>(Message::Text(frame))));

        let stream = receiver.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Peer sent close");
                    None
                }
                Ok(_) => None,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
                Err(e) => Some(Err(map_ws_error(e))),
            })
        });

        Ok(Duplex::new(Box::pin(sink), stream.boxed()))
    }
}

fn map_ws_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
        other => TransportError::WebSocket(other.to_string()),
    }
}
