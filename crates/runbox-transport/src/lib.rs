//! Transport layer for the runbox job protocol.
//!
//! Provides:
//! - `Handshake` - Session id + credential carried by the connection request
//! - `Connector` - Seam for opening connections
//! - `ReadinessGate` - Holds submissions until the connection opens
//! - `Connection` - One session connection driven by a background task
//! - WebSocket connector (feature: websocket)
//! - In-process connector (feature: memory)

pub mod connection;
pub mod connector;
pub mod gate;
pub mod handshake;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "memory")]
pub mod memory;

pub use connection::{Connection, ConnectionEvent, PendingSend};
pub use connector::{Connector, Duplex, FrameSink, FrameStream, TransportError};
pub use gate::{Admit, ReadinessGate};
pub use handshake::Handshake;

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryPeer, MemoryRequest, MemoryServer, memory_pair};
