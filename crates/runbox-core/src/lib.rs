//! Core building blocks for running code on a remote job runner.
//!
//! This crate provides:
//! - `protocol` - Wire messages and the JSON frame codec
//! - `JobState` - Job lifecycle state machine
//! - `SessionEvent` - Events delivered to a session's owner
//! - `Transcript` - Broadcast + history of a run's output
//! - Share links and starter templates

pub mod event;
pub mod job;
pub mod protocol;
pub mod share;
pub mod templates;
pub mod transcript;

pub use event::{SessionEvent, SessionId};
pub use job::{Admission, JobOutcome, JobState, JobStatus, Step};
pub use protocol::{ClientCommand, CodecError, DEFAULT_TIMEOUT_MS, JobId, ServerMessage};
pub use share::{ShareError, SharePayload};
pub use templates::Language;
pub use transcript::{Banner, Transcript, TranscriptEntry};
