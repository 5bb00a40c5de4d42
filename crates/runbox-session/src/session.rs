//! Session facade: the only entry point callers use to run code.

use std::{
    cell::Cell,
    ptr,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use runbox_core::{
    Admission, ClientCommand, CodecError, JobId, JobOutcome, JobState, JobStatus, SessionEvent,
    SessionId, protocol,
};
use runbox_transport::{Connection, ConnectionEvent, Connector, Handshake, TransportError};
use uuid::Uuid;

use crate::SessionConfig;

/// Callback receiving a session's events, in arrival order.
pub type EventHandler = Box<dyn FnMut(SessionEvent) + Send>;

type SharedHandler = Arc<Mutex<EventHandler>>;

thread_local! {
    /// Session whose handler is running on this thread, if any.
    static DISPATCHING: Cell<*const ()> = const { Cell::new(ptr::null()) };
}

/// Marks the current thread as running a session's handler until dropped.
struct Dispatching(*const ());

impl Dispatching {
    fn enter(owner: *const ()) -> Self {
        Self(DISPATCHING.replace(owner))
    }
}

impl Drop for Dispatching {
    fn drop(&mut self) {
        DISPATCHING.set(self.0);
    }
}

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No connection has been opened")]
    NotConnected,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("A job is already active on this session")]
    JobAlreadyActive,
    #[error("Nothing to run")]
    EmptyProgram,
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Transport(other),
        }
    }
}

/// One press of the run button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub language: String,
    pub code: String,
    /// Falls back to the session's configured default.
    pub timeout: Option<Duration>,
}

impl RunRequest {
    /// Create a run request with the configured default timeout.
    #[must_use]
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            timeout: None,
        }
    }

    /// Set the timeout the runner enforces.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Shared {
    /// Bumped on every connect/disconnect; listeners of older connections
    /// compare against it and go quiet.
    epoch: u64,
    connection: Option<Connection>,
    ever_connected: bool,
    open: bool,
    job: JobState,
    handler: Option<SharedHandler>,
}

impl Shared {
    /// Update state for one connection event and pick the handler that
    /// should see it.
    fn dispatch(
        &mut self,
        session_id: SessionId,
        event: ConnectionEvent,
    ) -> Option<(SharedHandler, SessionEvent)> {
        let event = match event {
            ConnectionEvent::Opened => {
                self.open = true;
                SessionEvent::Connected { session_id }
            }
            ConnectionEvent::Frame(text) => {
                let message = match protocol::decode(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(%session_id, "Dropping inbound frame: {e}");
                        return None;
                    }
                };
                let step = self.job.apply(&message);
                if let Some(outcome) = &step.outcome {
                    tracing::info!(%session_id, ?outcome, "Job ended");
                }
                if !step.deliver {
                    return None;
                }
                SessionEvent::Server(message)
            }
            ConnectionEvent::Failed(error) => {
                self.open = false;
                self.job.reset();
                SessionEvent::ConnectionFailed {
                    reason: error.to_string(),
                }
            }
            ConnectionEvent::Closed { reason } => {
                self.open = false;
                let abandoned_job = self.job.reset();
                SessionEvent::ConnectionLost {
                    reason,
                    abandoned_job,
                }
            }
        };

        self.handler.clone().map(|handler| (handler, event))
    }
}

/// Client side of one user's run session.
///
/// Owns at most one connection at a time. Each [`Session::connect`] replaces
/// the previous connection; events from a replaced connection never reach
/// the new handler.
///
/// The handler runs on the connection's driver task, outside the session
/// lock, so it may read the session's accessors. It must not call
/// [`Session::connect`] or [`Session::disconnect`] on the same session; debug
/// builds panic if it does. Hand that work off to a task instead.
pub struct Session {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    shared: Arc<Mutex<Shared>>,
}

impl Session {
    /// Create a session using `connector` for every connection.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            shared: Arc::new(Mutex::new(Shared {
                epoch: 0,
                connection: None,
                ever_connected: false,
                open: false,
                job: JobState::new(),
                handler: None,
            })),
        }
    }

    /// Create a session connecting over WebSocket.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn websocket(config: SessionConfig) -> Self {
        Self::new(Arc::new(runbox_transport::WebSocketConnector::new()), config)
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn debug_assert_not_dispatching(&self, operation: &str) {
        debug_assert!(
            !ptr::eq(DISPATCHING.get(), Arc::as_ptr(&self.shared).cast()),
            "Session::{operation} called from the session's own event handler"
        );
    }

    /// Replace any current connection with a new one for `session_id`.
    ///
    /// Returns without waiting for the connection to open; commands sent in
    /// the meantime are held until it does.
    pub fn connect<H>(&self, handler: H, session_id: SessionId)
    where
        H: FnMut(SessionEvent) + Send + 'static,
    {
        self.debug_assert_not_dispatching("connect");

        let (epoch, previous) = {
            let mut shared = self.lock();
            shared.epoch += 1;
            shared.handler = None;
            shared.open = false;
            if let Some(job_id) = shared.job.reset() {
                tracing::info!(%job_id, "Abandoning running job for a new connection");
            }
            (shared.epoch, shared.connection.take())
        };

        if let Some(mut previous) = previous {
            previous.close();
        }

        let handshake = Handshake::new(
            self.config.endpoint.clone(),
            session_id,
            self.config.token.clone(),
        );

        let mut shared = self.lock();
        if shared.epoch != epoch {
            tracing::debug!(%session_id, "Connect superseded before it started");
            return;
        }
        shared.ever_connected = true;
        shared.handler = Some(Arc::new(Mutex::new(Box::new(handler))));
        shared.connection = Some(Connection::open(
            Arc::clone(&self.connector),
            handshake,
            listener(Arc::downgrade(&self.shared), epoch, session_id),
        ));
        tracing::info!(%session_id, endpoint = %self.config.endpoint, "Connecting");
    }

    /// Close the current connection and return to the idle baseline.
    ///
    /// No event is emitted for a job still in flight; its id is returned
    /// instead.
    pub fn disconnect(&self) -> Option<JobId> {
        self.debug_assert_not_dispatching("disconnect");

        let (previous, abandoned) = {
            let mut shared = self.lock();
            shared.epoch += 1;
            shared.handler = None;
            shared.open = false;
            (shared.connection.take(), shared.job.reset())
        };

        if let Some(mut previous) = previous {
            tracing::info!(session_id = %previous.session_id(), "Disconnecting");
            previous.close();
        }
        if let Some(job_id) = &abandoned {
            tracing::info!(%job_id, "Abandoned running job");
        }
        abandoned
    }

    /// Send a command over the current connection.
    ///
    /// Waits for the connection to open if it has not yet. A `stdin` command
    /// without a matching running job is dropped and reported as success.
    ///
    /// # Errors
    /// Returns error if no connection was ever opened, the connection closed
    /// before the command went out, or a job is already active for `start_job`.
    pub async fn send(&self, command: ClientCommand) -> Result<(), SessionError> {
        self.transmit(command).await.map(|_| ())
    }

    /// Send a command; `Ok(false)` when admission dropped it.
    async fn transmit(&self, command: ClientCommand) -> Result<bool, SessionError> {
        let frame = protocol::encode(&command)?;

        let (pending, epoch) = {
            let mut guard = self.lock();
            let shared = &mut *guard;
            let Some(connection) = shared.connection.as_ref() else {
                return Err(if shared.ever_connected {
                    SessionError::ConnectionClosed
                } else {
                    SessionError::NotConnected
                });
            };
            match shared.job.admit(&command) {
                Admission::Send => {}
                Admission::Skip => return Ok(false),
                Admission::JobAlreadyActive => return Err(SessionError::JobAlreadyActive),
            }
            (connection.submit(frame), shared.epoch)
        };

        match pending.await {
            Ok(()) => {
                tracing::debug!(kind = command.kind(), "Command sent");
                Ok(true)
            }
            Err(e) => {
                if matches!(command, ClientCommand::StartJob { .. }) {
                    let mut shared = self.lock();
                    if shared.epoch == epoch && shared.job.status() == JobStatus::Starting {
                        shared.job.reset();
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Send `input` to the running job's stdin.
    ///
    /// Returns whether the input went out; without a running job it is
    /// dropped and this returns `false`.
    ///
    /// # Errors
    /// Returns error if the connection closed before the input went out.
    pub async fn send_stdin(&self, input: impl Into<String>) -> Result<bool, SessionError> {
        let Some(job_id) = self.job_id() else {
            tracing::debug!("No running job, dropping stdin");
            return Ok(false);
        };
        self.transmit(ClientCommand::stdin(job_id, input)).await
    }

    /// Start a fresh run: new connection, new session id, `start_job`.
    ///
    /// Any previous connection and its job are abandoned. Returns once the
    /// runner has been sent the job.
    ///
    /// # Errors
    /// Returns error if the program is blank or the connection closed before
    /// `start_job` went out.
    pub async fn run<H>(&self, handler: H, request: RunRequest) -> Result<SessionId, SessionError>
    where
        H: FnMut(SessionEvent) + Send + 'static,
    {
        if request.code.trim().is_empty() {
            return Err(SessionError::EmptyProgram);
        }

        let session_id = Uuid::new_v4();
        self.connect(handler, session_id);

        let timeout_ms = request.timeout.map_or_else(
            || self.config.default_timeout_ms(),
            |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX),
        );
        let command =
            ClientCommand::start_job(request.language, request.code).with_timeout(timeout_ms);
        self.send(command).await?;
        Ok(session_id)
    }

    /// Status of the current job.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.lock().job.status()
    }

    /// Id of the running job.
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.lock().job.job_id().cloned()
    }

    /// Outcome of the last job that ended on this session.
    #[must_use]
    pub fn last_outcome(&self) -> Option<JobOutcome> {
        self.lock().job.last_outcome().cloned()
    }

    /// Whether the current connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().open
    }

    /// Session id of the current connection.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().connection.as_ref().map(Connection::session_id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn listener(
    shared: Weak<Mutex<Shared>>,
    epoch: u64,
    session_id: SessionId,
) -> impl FnMut(ConnectionEvent) + Send + 'static {
    move |event| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let delivery = {
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.epoch != epoch {
                tracing::trace!(%session_id, "Dropping event of a replaced connection");
                return;
            }
            guard.dispatch(session_id, event)
        };

        if let Some((handler, event)) = delivery {
            let _dispatching = Dispatching::enter(Arc::as_ptr(&shared).cast());
            let mut guard = handler.lock().unwrap_or_else(PoisonError::into_inner);
            let handler = &mut **guard;
            handler(event);
        }
    }
}
