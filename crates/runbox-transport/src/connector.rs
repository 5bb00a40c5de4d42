//! Connector trait and the duplex frame channel it produces.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, stream::BoxStream};
use thiserror::Error;

use crate::Handshake;

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Outbound half: accepts one text frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: yields text frames in arrival order, ends when the peer closes.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// An established connection, split into its two halves.
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Duplex {
    /// Pair up the two halves.
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Trait for transports able to open a session connection.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the connection described by `handshake`.
    async fn connect(&self, handshake: &Handshake) -> Result<Duplex, TransportError>;
}
