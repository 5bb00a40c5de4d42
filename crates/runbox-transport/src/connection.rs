//! A single session connection and the task driving it.
//!
//! `Connection::open` returns immediately; a background task establishes the
//! connection, holds early submissions behind the readiness gate, forwards
//! inbound frames to the listener and writes outbound frames in submission
//! order.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use futures::{SinkExt, StreamExt};
use runbox_core::SessionId;
use tokio::sync::{mpsc, oneshot};

use crate::{
    Connector, Handshake, TransportError,
    connector::{Duplex, FrameSink},
    gate::{Admit, ReadinessGate},
};

/// Event reported by a connection to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is established; queued submissions are going out.
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// The connection could not be established.
    Failed(TransportError),
    /// The connection dropped after opening.
    Closed { reason: Option<String> },
}

type Listener = Box<dyn FnMut(ConnectionEvent) + Send>;
type ListenerSlot = Arc<Mutex<Option<Listener>>>;
type Ack = oneshot::Sender<Result<(), TransportError>>;

struct Submission {
    frame: String,
    ack: Ack,
}

impl Submission {
    fn reject(self) {
        let _ = self.ack.send(Err(TransportError::ConnectionClosed));
    }
}

/// Completion of one submitted frame.
///
/// Resolves once the frame is written, or with
/// [`TransportError::ConnectionClosed`] if the connection goes away first.
#[must_use = "a submission is only known to be sent once this resolves"]
pub struct PendingSend {
    rx: oneshot::Receiver<Result<(), TransportError>>,
}

impl Future for PendingSend {
    type Output = Result<(), TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(TransportError::ConnectionClosed)))
    }
}

/// Handle to one session connection.
///
/// Dropping the handle closes the connection.
pub struct Connection {
    session_id: SessionId,
    commands: Option<mpsc::UnboundedSender<Submission>>,
    shutdown: Option<oneshot::Sender<()>>,
    listener: ListenerSlot,
}

impl Connection {
    /// Start connecting and return at once.
    ///
    /// Progress is reported through `listener`. Must be called from within a
    /// Tokio runtime.
    pub fn open<L>(connector: Arc<dyn Connector>, handshake: Handshake, listener: L) -> Self
    where
        L: FnMut(ConnectionEvent) + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener: ListenerSlot = Arc::new(Mutex::new(Some(Box::new(listener))));
        let session_id = handshake.session_id;

        let driver = Driver {
            connector,
            handshake,
            commands: commands_rx,
            shutdown: shutdown_rx,
            listener: Arc::clone(&listener),
            gate: ReadinessGate::new(),
        };
        tokio::spawn(driver.run());

        Self {
            session_id,
            commands: Some(commands_tx),
            shutdown: Some(shutdown_tx),
            listener,
        }
    }

    /// Session this connection belongs to.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queue one frame for transmission.
    ///
    /// Frames go out in the order they are submitted, after the connection
    /// opens.
    pub fn submit(&self, frame: String) -> PendingSend {
        let (ack, rx) = oneshot::channel();
        let submission = Submission { frame, ack };
        match &self.commands {
            Some(tx) => {
                if let Err(mpsc::error::SendError(submission)) = tx.send(submission) {
                    submission.reject();
                }
            }
            None => submission.reject(),
        }
        PendingSend { rx }
    }

    /// Close the connection.
    ///
    /// The listener is detached before this returns; it sees nothing more,
    /// even for frames the transport already received. Idempotent.
    pub fn close(&mut self) {
        let detached = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        self.commands = None;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if detached {
            tracing::debug!(session_id = %self.session_id, "Connection closed by owner");
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    handshake: Handshake,
    commands: mpsc::UnboundedReceiver<Submission>,
    shutdown: oneshot::Receiver<()>,
    listener: ListenerSlot,
    gate: ReadinessGate<Submission>,
}

impl Driver {
    async fn run(mut self) {
        let session_id = self.handshake.session_id;
        let Some(Duplex {
            mut sink,
            mut stream,
        }) = self.establish().await
        else {
            return;
        };

        tracing::info!(%session_id, "Connection open");
        self.emit(ConnectionEvent::Opened);

        for submission in self.gate.open() {
            if let Err(e) = transmit(&mut sink, submission).await {
                self.lost(Some(e.to_string()));
                return;
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    if let Err(e) = sink.close().await {
                        tracing::debug!(%session_id, "Error closing connection: {e}");
                    }
                    self.reject_queued();
                    return;
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.emit(ConnectionEvent::Frame(text)),
                    Some(Err(e)) => {
                        tracing::warn!(%session_id, "Connection error: {e}");
                        self.lost(Some(e.to_string()));
                        return;
                    }
                    None => {
                        self.lost(None);
                        return;
                    }
                },
                Some(submission) = self.commands.recv() => {
                    if let Some(submission) = self.offer(submission) {
                        if let Err(e) = transmit(&mut sink, submission).await {
                            self.lost(Some(e.to_string()));
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Connect while queueing submissions behind the gate.
    async fn establish(&mut self) -> Option<Duplex> {
        let connector = Arc::clone(&self.connector);
        let handshake = self.handshake.clone();
        let connect = async move { connector.connect(&handshake).await };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    tracing::debug!(session_id = %self.handshake.session_id, "Closed before open");
                    self.reject_queued();
                    return None;
                }
                result = &mut connect => match result {
                    Ok(duplex) => return Some(duplex),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %self.handshake.session_id,
                            "Connect failed: {e}"
                        );
                        self.reject_queued();
                        self.emit(ConnectionEvent::Failed(e));
                        return None;
                    }
                },
                Some(submission) = self.commands.recv() => {
                    // The gate only opens after `establish` returns.
                    if let Some(submission) = self.offer(submission) {
                        submission.reject();
                    }
                }
            }
        }
    }

    /// Pass a submission through the gate; returns it if it may go out now.
    fn offer(&mut self, submission: Submission) -> Option<Submission> {
        match self.gate.submit(submission) {
            Admit::Ready(submission) => Some(submission),
            Admit::Deferred => None,
            Admit::Rejected(submission) => {
                submission.reject();
                None
            }
        }
    }

    fn reject_queued(&mut self) {
        for submission in self.gate.close() {
            submission.reject();
        }
        self.commands.close();
        while let Ok(submission) = self.commands.try_recv() {
            submission.reject();
        }
    }

    fn lost(&mut self, reason: Option<String>) {
        tracing::info!(session_id = %self.handshake.session_id, ?reason, "Connection lost");
        self.reject_queued();
        self.emit(ConnectionEvent::Closed { reason });
    }

    fn emit(&self, event: ConnectionEvent) {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(listener) => listener(event),
            None => tracing::trace!("Listener detached, dropping {event:?}"),
        }
    }
}

async fn transmit(sink: &mut FrameSink, submission: Submission) -> Result<(), TransportError> {
    let Submission { frame, ack } = submission;
    let result = sink.send(frame).await;
    let _ = ack.send(result.clone());
    result
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    use super::*;
    use crate::memory::memory_pair;

    fn recorder() -> (
        impl FnMut(ConnectionEvent) + Send + 'static,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |event| drop(tx.send(event)), rx)
    }

    fn handshake() -> Handshake {
        Handshake::new("ws://memory/ws", Uuid::new_v4(), Some("token".into()))
    }

    #[tokio::test]
    async fn test_early_submissions_go_out_after_open_in_order() {
        let (connector, mut server) = memory_pair();
        let (listener, mut events) = recorder();
        let conn = Connection::open(Arc::new(connector), handshake(), listener);

        let first = conn.submit("one".into());
        let second = conn.submit("two".into());

        let request = server.next_request().await.unwrap();
        assert_eq!(request.handshake().credential.as_deref(), Some("token"));
        let mut peer = request.accept();

        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
        assert_ok!(first.await);
        assert_ok!(second.await);
        assert_eq!(peer.recv().await.as_deref(), Some("one"));
        assert_eq!(peer.recv().await.as_deref(), Some("two"));

        assert_ok!(conn.submit("three".into()).await);
        assert_eq!(peer.recv().await.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn test_close_before_open_rejects_pending() {
        let (connector, mut server) = memory_pair();
        let (listener, _events) = recorder();
        let mut conn = Connection::open(Arc::new(connector), handshake(), listener);

        let pending = conn.submit("start".into());
        let _request = server.next_request().await.unwrap();
        conn.close();

        assert_eq!(pending.await, Err(TransportError::ConnectionClosed));
        assert_eq!(
            conn.submit("late".into()).await,
            Err(TransportError::ConnectionClosed)
        );
        assert!(conn.is_closed());
        conn.close();
    }

    #[tokio::test]
    async fn test_close_detaches_listener() {
        let (connector, mut server) = memory_pair();
        let (listener, mut events) = recorder();
        let mut conn = Connection::open(Arc::new(connector), handshake(), listener);

        let mut peer = server.accept().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

        conn.close();
        peer.send("after close");

        // The driver closes its sink, ending the peer's inbound stream.
        assert_eq!(peer.recv().await, None);
        let late = timeout(Duration::from_millis(50), events.recv()).await;
        assert!(late.map_or(true, |e| e.is_none()));
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (connector, mut server) = memory_pair();
        let (listener, mut events) = recorder();
        let _conn = Connection::open(Arc::new(connector), handshake(), listener);

        let peer = server.accept().await.unwrap();
        for frame in ["a", "b", "c"] {
            peer.send(frame);
        }

        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
        for frame in ["a", "b", "c"] {
            assert_eq!(events.recv().await, Some(ConnectionEvent::Frame(frame.into())));
        }
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        let (connector, mut server) = memory_pair();
        let (listener, mut events) = recorder();
        let conn = Connection::open(Arc::new(connector), handshake(), listener);

        let peer = server.accept().await.unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
        drop(peer);

        assert_eq!(events.recv().await, Some(ConnectionEvent::Closed { reason: None }));
        assert_eq!(
            conn.submit("x".into()).await,
            Err(TransportError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (connector, mut server) = memory_pair();
        let (listener, mut events) = recorder();
        let conn = Connection::open(Arc::new(connector), handshake(), listener);
        let pending = conn.submit("start".into());

        server.next_request().await.unwrap().reject("unauthorized");

        assert!(matches!(
            events.recv().await,
            Some(ConnectionEvent::Failed(TransportError::ConnectFailed(reason)))
                if reason.contains("unauthorized")
        ));
        assert_eq!(pending.await, Err(TransportError::ConnectionClosed));
    }
}
