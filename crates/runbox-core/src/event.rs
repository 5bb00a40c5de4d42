//! Events delivered to the owner of a session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{JobId, ServerMessage};

/// Session identifier, generated client-side for every connect.
pub type SessionId = Uuid;

/// Event observed by a session's handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The connection for `session_id` is open.
    Connected { session_id: SessionId },
    /// A message from the runner, accepted by the job state machine.
    Server(ServerMessage),
    /// The connection could not be established; nothing was run.
    ConnectionFailed { reason: String },
    /// The connection dropped after opening. Any job in flight is gone.
    ConnectionLost {
        reason: Option<String>,
        abandoned_job: Option<JobId>,
    },
}

impl SessionEvent {
    /// Whether no further events follow for the current run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Server(ServerMessage::JobFinished { .. } | ServerMessage::JobError { .. })
                | Self::ConnectionFailed { .. }
                | Self::ConnectionLost { .. }
        )
    }
}
