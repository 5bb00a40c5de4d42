//! Output transcript: broadcast + bounded history of a run's output.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{SessionEvent, protocol::ServerMessage};

/// Default history size limit (16 MB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

/// Line appended when a job exits with code 0.
pub const SUCCESS_BANNER: &str = "\n=== Code Execution Successful ===\n";
/// Line appended when a job exits with any other code.
pub const FAILURE_BANNER: &str = "\n=== Code Exited With Errors ===\n";
/// Line appended when the runner killed the job for running too long.
pub const TIMEOUT_BANNER: &str = "\n=== Code Execution Timed Out ===\n";

/// Status line rendered into the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "banner", rename_all = "snake_case")]
pub enum Banner {
    Success,
    Failure { exit_code: Option<i32> },
    TimedOut,
    JobError { message: String },
    ConnectionFailed { reason: String },
    ConnectionLost { reason: Option<String> },
}

impl Banner {
    /// Rendered text.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Success => SUCCESS_BANNER.to_string(),
            Self::Failure { .. } => FAILURE_BANNER.to_string(),
            Self::TimedOut => TIMEOUT_BANNER.to_string(),
            Self::JobError { message } => format!("[error] {message}\n"),
            Self::ConnectionFailed { reason } => {
                format!("\n[connection] could not reach the runner: {reason}\n")
            }
            Self::ConnectionLost { reason: Some(reason) } => {
                format!("\n[connection] lost: {reason}\n")
            }
            Self::ConnectionLost { reason: None } => "\n[connection] lost\n".to_string(),
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Stdout(String),
    Stderr(String),
    /// Text the user typed into stdin.
    Echo(String),
    Banner(Banner),
    /// The output was wiped; live listeners should reset their view.
    Cleared,
}

impl TranscriptEntry {
    /// Rendered text; empty for `Cleared`.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Stdout(s) | Self::Stderr(s) | Self::Echo(s) => s.clone(),
            Self::Banner(banner) => banner.text(),
            Self::Cleared => String::new(),
        }
    }

    fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 8;
        match self {
            Self::Stdout(s) | Self::Stderr(s) | Self::Echo(s) => s.len() + OVERHEAD,
            Self::Banner(_) | Self::Cleared => OVERHEAD * 8,
        }
    }

    /// Whether this entry closes a run.
    #[must_use]
    pub const fn is_banner(&self) -> bool {
        matches!(self, Self::Banner(_))
    }
}

#[derive(Clone)]
struct StoredEntry {
    entry: TranscriptEntry,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEntry>,
    total_bytes: usize,
}

/// Output transcript with broadcast and history support.
///
/// Chunks are kept exactly as received; nothing is split into lines or merged.
pub struct Transcript {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<TranscriptEntry>,
    limit_bytes: usize,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Create a transcript with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(HISTORY_BYTES)
    }

    /// Create a transcript keeping at most `limit_bytes` of history.
    #[must_use]
    pub fn with_limit(limit_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            limit_bytes,
        }
    }

    /// Push an entry to both live listeners and history.
    ///
    /// The broadcast happens under the history lock, so a concurrent
    /// [`Transcript::history_plus_stream`] sees each entry exactly once.
    pub fn push(&self, entry: TranscriptEntry) {
        let bytes = entry.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let _ = self.sender.send(entry.clone());
        while inner.total_bytes.saturating_add(bytes) > self.limit_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEntry { entry, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push stdout chunk.
    pub fn push_stdout<S: Into<String>>(&self, s: S) {
        self.push(TranscriptEntry::Stdout(s.into()));
    }

    /// Push stderr chunk.
    pub fn push_stderr<S: Into<String>>(&self, s: S) {
        self.push(TranscriptEntry::Stderr(s.into()));
    }

    /// Push text the user sent to stdin.
    pub fn push_echo<S: Into<String>>(&self, s: S) {
        self.push(TranscriptEntry::Echo(s.into()));
    }

    /// Push a banner.
    pub fn push_banner(&self, banner: Banner) {
        self.push(TranscriptEntry::Banner(banner));
    }

    /// Drop the history and tell live listeners to reset.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.history.clear();
        inner.total_bytes = 0;
        let _ = self.sender.send(TranscriptEntry::Cleared);
    }

    /// Fold a session event into the transcript.
    pub fn record(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Server(message) => match message {
                ServerMessage::Stdout { chunk, .. } => self.push_stdout(chunk.as_str()),
                ServerMessage::Stderr { chunk, .. } => self.push_stderr(chunk.as_str()),
                ServerMessage::JobStarted { .. } => self.clear(),
                ServerMessage::JobFinished {
                    exit_code,
                    killed_by_timeout,
                    ..
                } => {
                    let banner = if killed_by_timeout.unwrap_or(false) {
                        Banner::TimedOut
                    } else if *exit_code == Some(0) {
                        Banner::Success
                    } else {
                        Banner::Failure {
                            exit_code: *exit_code,
                        }
                    };
                    self.push_banner(banner);
                }
                ServerMessage::JobError { message } => self.push_banner(Banner::JobError {
                    message: message.clone(),
                }),
                ServerMessage::Log { .. } | ServerMessage::NeedsInput { .. } => {}
            },
            SessionEvent::ConnectionFailed { reason } => {
                self.push_banner(Banner::ConnectionFailed {
                    reason: reason.clone(),
                });
            }
            SessionEvent::ConnectionLost { reason, .. } => {
                self.push_banner(Banner::ConnectionLost {
                    reason: reason.clone(),
                });
            }
            SessionEvent::Connected { .. } => {}
        }
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<TranscriptEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.entry.clone())
            .collect()
    }

    /// Concatenated output text.
    #[must_use]
    pub fn text(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.entry.text())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Entries dropped by a lagging receiver are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, TranscriptEntry> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<_> = inner.history.iter().map(|s| s.entry.clone()).collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
