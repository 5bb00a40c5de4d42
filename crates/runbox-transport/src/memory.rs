//! In-process connector.
//!
//! Useful for tests and demos. The server side decides when each handshake
//! is accepted, so callers can observe the window before a connection opens.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, channel::mpsc as frames};
use tokio::sync::{mpsc, oneshot};

use crate::{Connector, Duplex, Handshake, TransportError};

/// Create a connected connector/server pair.
#[must_use]
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            requests: requests_tx,
        },
        MemoryServer {
            requests: requests_rx,
        },
    )
}

/// Client side: every `connect` becomes a [`MemoryRequest`] on the server.
#[derive(Clone)]
pub struct MemoryConnector {
    requests: mpsc::UnboundedSender<MemoryRequest>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, handshake: &Handshake) -> Result<Duplex, TransportError> {
        let (reply, reply_rx) = oneshot::channel();
        self.requests
            .send(MemoryRequest {
                handshake: handshake.clone(),
                reply,
            })
            .map_err(|_| TransportError::ConnectFailed("memory server is gone".into()))?;

        reply_rx
            .await
            .map_err(|_| TransportError::ConnectFailed("handshake dropped".into()))?
    }
}

/// Server side of the in-process transport.
pub struct MemoryServer {
    requests: mpsc::UnboundedReceiver<MemoryRequest>,
}

impl MemoryServer {
    /// Wait for the next handshake.
    pub async fn next_request(&mut self) -> Option<MemoryRequest> {
        self.requests.recv().await
    }

    /// Wait for the next handshake and accept it.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.next_request().await.map(MemoryRequest::accept)
    }
}

/// A pending handshake.
pub struct MemoryRequest {
    handshake: Handshake,
    reply: oneshot::Sender<Result<Duplex, TransportError>>,
}

impl MemoryRequest {
    /// Parameters the client connected with.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Complete the handshake.
    #[must_use]
    pub fn accept(self) -> MemoryPeer {
        let (to_client, client_rx) = frames::unbounded::<String>();
        let (client_tx, from_client) = frames::unbounded::<String>();

        let duplex = Duplex::new(
            Box::pin(client_tx.sink_map_err(|_| TransportError::ConnectionClosed)),
            client_rx.map(Ok::<_, TransportError>).boxed(),
        );
        if self.reply.send(Ok(duplex)).is_err() {
            tracing::debug!(
                session_id = %self.handshake.session_id,
                "Client gave up before accept"
            );
        }

        MemoryPeer {
            handshake: self.handshake,
            to_client,
            from_client,
        }
    }

    /// Refuse the handshake.
    pub fn reject(self, reason: &str) {
        let _ = self
            .reply
            .send(Err(TransportError::ConnectFailed(reason.to_string())));
    }
}

/// Server end of an accepted connection. Dropping it closes the connection.
pub struct MemoryPeer {
    handshake: Handshake,
    to_client: frames::UnboundedSender<String>,
    from_client: frames::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Parameters the client connected with.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Push one frame to the client. Returns false once the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client.unbounded_send(frame.into()).is_ok()
    }

    /// Next frame from the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }
}
