//! Job lifecycle tracking.
//!
//! ```text
//! Idle --start_job--> Starting --job_started--> Running --job_finished--> Finished --> Idle
//!                        |                         |
//!                        +------job_error----------+--------------------> Errored  --> Idle
//! ```
//!
//! `Finished` and `Errored` are passed through inside a single step; the
//! machine rests in `Idle`, `Starting` or `Running`.

use serde::{Deserialize, Serialize};

use crate::protocol::{ClientCommand, JobId, ServerMessage};

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No job on this session.
    Idle,
    /// `start_job` submitted, waiting for `job_started`.
    Starting,
    /// The runner reported `job_started`.
    Running,
    /// The job exited.
    Finished,
    /// The runner reported `job_error`.
    Errored,
}

impl JobStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting)
                | (Self::Starting, Self::Running | Self::Errored)
                | (Self::Running, Self::Finished | Self::Errored)
                | (Self::Finished | Self::Errored, Self::Idle)
        )
    }

    /// Whether a job is in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job exited, possibly killed by the runner's timeout.
    Finished {
        job_id: JobId,
        exit_code: Option<i32>,
        killed_by_timeout: bool,
    },
    /// The runner reported an error.
    Errored { message: String },
}

impl JobOutcome {
    /// A job succeeded only if it exited with code 0 on its own.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Finished {
                exit_code: Some(0),
                killed_by_timeout: false,
                ..
            }
        )
    }
}

/// Decision on an outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Transmit the command.
    Send,
    /// Drop the command without error.
    Skip,
    /// A job is already in flight on this session.
    JobAlreadyActive,
}

/// Result of feeding one inbound message to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Whether the message reaches the caller.
    pub deliver: bool,
    /// Set when the message ended the job.
    pub outcome: Option<JobOutcome>,
}

impl Step {
    const fn delivered() -> Self {
        Self {
            deliver: true,
            outcome: None,
        }
    }

    const fn dropped() -> Self {
        Self {
            deliver: false,
            outcome: None,
        }
    }

    const fn terminal(outcome: JobOutcome) -> Self {
        Self {
            deliver: true,
            outcome: Some(outcome),
        }
    }
}

/// Current job of a session.
///
/// `job_id` is only ever set while the status is `Running`.
#[derive(Debug, Clone)]
pub struct JobState {
    status: JobStatus,
    job_id: Option<JobId>,
    last_outcome: Option<JobOutcome>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    /// Create an idle job state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            job_id: None,
            last_outcome: None,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Id of the running job.
    #[must_use]
    pub const fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    /// Outcome of the most recent job that ended.
    #[must_use]
    pub const fn last_outcome(&self) -> Option<&JobOutcome> {
        self.last_outcome.as_ref()
    }

    /// Decide whether an outbound command goes on the wire, updating the
    /// status when it does.
    pub fn admit(&mut self, command: &ClientCommand) -> Admission {
        match command {
            ClientCommand::StartJob { .. } => {
                if self.status.is_active() {
                    return Admission::JobAlreadyActive;
                }
                self.transition(JobStatus::Starting);
                Admission::Send
            }
            ClientCommand::Stdin { job_id, .. } => {
                if self.status == JobStatus::Running && self.job_id.as_ref() == Some(job_id) {
                    Admission::Send
                } else {
                    tracing::debug!(
                        job_id = %job_id,
                        status = ?self.status,
                        "Dropping stdin without a matching running job"
                    );
                    Admission::Skip
                }
            }
        }
    }

    /// Feed one inbound message.
    pub fn apply(&mut self, message: &ServerMessage) -> Step {
        match message {
            ServerMessage::Stdout { job_id, .. } | ServerMessage::Stderr { job_id, .. } => {
                if !self.status.is_active() {
                    tracing::debug!(kind = message.kind(), "Dropping output without an active job");
                    return Step::dropped();
                }
                if let (Some(tagged), Some(current)) = (job_id, &self.job_id) {
                    if tagged != current {
                        tracing::debug!(%tagged, %current, "Dropping output of a stale job");
                        return Step::dropped();
                    }
                }
                Step::delivered()
            }
            ServerMessage::JobStarted { job_id } => {
                if self.status != JobStatus::Starting {
                    tracing::warn!(%job_id, status = ?self.status, "Unexpected job_started");
                    return Step::dropped();
                }
                self.transition(JobStatus::Running);
                self.job_id = Some(job_id.clone());
                Step::delivered()
            }
            ServerMessage::JobFinished {
                job_id,
                exit_code,
                killed_by_timeout,
            } => {
                if self.status != JobStatus::Running || self.job_id.as_ref() != Some(job_id) {
                    tracing::warn!(
                        %job_id,
                        status = ?self.status,
                        "Dropping job_finished for a job that is not running"
                    );
                    return Step::dropped();
                }
                let outcome = JobOutcome::Finished {
                    job_id: job_id.clone(),
                    exit_code: *exit_code,
                    killed_by_timeout: killed_by_timeout.unwrap_or(false),
                };
                self.finish(JobStatus::Finished, outcome.clone());
                Step::terminal(outcome)
            }
            ServerMessage::JobError { message } => {
                if !self.status.is_active() {
                    return Step::delivered();
                }
                let outcome = JobOutcome::Errored {
                    message: message.clone(),
                };
                self.finish(JobStatus::Errored, outcome.clone());
                Step::terminal(outcome)
            }
            ServerMessage::Log { .. } | ServerMessage::NeedsInput { .. } => Step::delivered(),
        }
    }

    /// Return to `Idle` without an outcome, yielding the abandoned job id.
    pub fn reset(&mut self) -> Option<JobId> {
        if self.status != JobStatus::Idle {
            tracing::debug!(from = ?self.status, "Job state reset");
        }
        self.status = JobStatus::Idle;
        self.job_id.take()
    }

    fn finish(&mut self, terminal: JobStatus, outcome: JobOutcome) {
        self.transition(terminal);
        self.job_id = None;
        self.last_outcome = Some(outcome);
        self.transition(JobStatus::Idle);
    }

    fn transition(&mut self, next: JobStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal job transition {:?} -> {next:?}",
            self.status
        );
        tracing::debug!(from = ?self.status, to = ?next, "Job transition");
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str) -> ServerMessage {
        ServerMessage::JobStarted { job_id: id.into() }
    }

    fn stdout(chunk: &str) -> ServerMessage {
        ServerMessage::Stdout {
            job_id: None,
            chunk: chunk.into(),
        }
    }

    fn running(id: &str) -> JobState {
        let mut state = JobState::new();
        assert_eq!(state.admit(&ClientCommand::start_job("python", "print(1)")), Admission::Send);
        assert!(state.apply(&started(id)).deliver);
        state
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::{Errored, Finished, Idle, Running, Starting};
        let all = [Idle, Starting, Running, Finished, Errored];
        let allowed = [
            (Idle, Starting),
            (Starting, Running),
            (Starting, Errored),
            (Running, Finished),
            (Running, Errored),
            (Finished, Idle),
            (Errored, Idle),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_start_then_started_runs() {
        let state = running("j1");
        assert_eq!(state.status(), JobStatus::Running);
        assert_eq!(state.job_id(), Some(&JobId::from("j1")));
    }

    #[test]
    fn test_finished_returns_to_idle() {
        let mut state = running("j1");
        let step = state.apply(&ServerMessage::JobFinished {
            job_id: "j1".into(),
            exit_code: Some(0),
            killed_by_timeout: None,
        });
        assert!(step.deliver);
        assert!(step.outcome.as_ref().is_some_and(JobOutcome::is_success));
        assert_eq!(state.status(), JobStatus::Idle);
        assert_eq!(state.job_id(), None);
        assert_eq!(state.last_outcome(), step.outcome.as_ref());
    }

    #[test]
    fn test_timeout_is_not_success() {
        let mut state = running("j1");
        let step = state.apply(&ServerMessage::JobFinished {
            job_id: "j1".into(),
            exit_code: Some(0),
            killed_by_timeout: Some(true),
        });
        assert!(!step.outcome.unwrap().is_success());
    }

    #[test]
    fn test_error_while_starting() {
        let mut state = JobState::new();
        state.admit(&ClientCommand::start_job("cobol", ""));
        let step = state.apply(&ServerMessage::JobError {
            message: "unsupported language".into(),
        });
        assert_eq!(
            step.outcome,
            Some(JobOutcome::Errored {
                message: "unsupported language".into()
            })
        );
        assert_eq!(state.status(), JobStatus::Idle);
    }

    #[test]
    fn test_error_while_idle_is_advisory() {
        let mut state = JobState::new();
        let step = state.apply(&ServerMessage::JobError {
            message: "busy".into(),
        });
        assert_eq!(step, Step::delivered());
        assert_eq!(state.status(), JobStatus::Idle);
        assert_eq!(state.last_outcome(), None);
    }

    #[test]
    fn test_running_requires_job_started() {
        let mut state = JobState::new();
        assert!(!state.apply(&started("j1")).deliver);
        assert_eq!(state.status(), JobStatus::Idle);
        assert_eq!(state.job_id(), None);
    }

    #[test]
    fn test_duplicate_job_started_is_dropped() {
        let mut state = running("j1");
        assert!(!state.apply(&started("j2")).deliver);
        assert_eq!(state.job_id(), Some(&JobId::from("j1")));
    }

    #[test]
    fn test_output_passes_through_without_state_change() {
        let mut state = running("j1");
        assert!(state.apply(&stdout("a")).deliver);
        assert!(
            state
                .apply(&ServerMessage::Stderr {
                    job_id: Some("j1".into()),
                    chunk: "b".into(),
                })
                .deliver
        );
        assert_eq!(state.status(), JobStatus::Running);
    }

    #[test]
    fn test_output_of_other_job_is_dropped() {
        let mut state = running("j2");
        let step = state.apply(&ServerMessage::Stdout {
            job_id: Some("j1".into()),
            chunk: "late".into(),
        });
        assert!(!step.deliver);
    }

    #[test]
    fn test_output_while_idle_is_dropped() {
        let mut state = JobState::new();
        assert!(!state.apply(&stdout("x")).deliver);
    }

    #[test]
    fn test_finished_for_other_job_is_dropped() {
        let mut state = running("j2");
        let step = state.apply(&ServerMessage::JobFinished {
            job_id: "j1".into(),
            exit_code: Some(1),
            killed_by_timeout: None,
        });
        assert!(!step.deliver);
        assert_eq!(state.status(), JobStatus::Running);
    }

    #[test]
    fn test_advisory_messages_keep_status() {
        let mut state = running("j1");
        assert!(state.apply(&ServerMessage::NeedsInput { job_id: "j1".into() }).deliver);
        assert!(state.apply(&ServerMessage::Log { message: "hi".into() }).deliver);
        assert_eq!(state.status(), JobStatus::Running);
    }

    #[test]
    fn test_stdin_is_skipped_unless_running() {
        let mut state = JobState::new();
        let stdin = ClientCommand::stdin("j1".into(), "x");
        assert_eq!(state.admit(&stdin), Admission::Skip);

        state.admit(&ClientCommand::start_job("python", "input()"));
        assert_eq!(state.admit(&stdin), Admission::Skip);

        state.apply(&started("j1"));
        assert_eq!(state.admit(&stdin), Admission::Send);
        assert_eq!(
            state.admit(&ClientCommand::stdin("j0".into(), "x")),
            Admission::Skip
        );
    }

    #[test]
    fn test_second_start_is_rejected_while_active() {
        let mut state = running("j1");
        assert_eq!(
            state.admit(&ClientCommand::start_job("python", "")),
            Admission::JobAlreadyActive
        );
        assert_eq!(state.status(), JobStatus::Running);
    }

    #[test]
    fn test_reset_abandons_job() {
        let mut state = running("j1");
        assert_eq!(state.reset(), Some(JobId::from("j1")));
        assert_eq!(state.status(), JobStatus::Idle);
        assert_eq!(state.job_id(), None);
        assert_eq!(state.last_outcome(), None);
        assert_eq!(state.reset(), None);
    }
}
