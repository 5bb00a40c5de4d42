//! Session facade for running code on a remote job runner.
//!
//! Provides:
//! - `Session` - Connect, run, feed stdin, disconnect
//! - `SessionConfig` - Endpoint, credential and default timeout

pub mod config;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use session::{EventHandler, RunRequest, Session, SessionError};

pub use runbox_core::{
    ClientCommand, JobId, JobOutcome, JobStatus, ServerMessage, SessionEvent, SessionId,
};
