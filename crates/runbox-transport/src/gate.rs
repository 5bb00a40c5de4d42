//! Readiness gate: holds submissions until the connection opens.

use std::collections::VecDeque;

enum GateState<T> {
    Connecting(VecDeque<T>),
    Open,
    Closed,
}

/// What the gate did with a submission.
#[derive(Debug, PartialEq, Eq)]
pub enum Admit<T> {
    /// The connection is open; transmit now.
    Ready(T),
    /// Queued until the connection opens.
    Deferred,
    /// The connection is gone; the submission is handed back.
    Rejected(T),
}

/// One-shot readiness gate of a single connection.
///
/// Starts in `Connecting`, resolves at most once. Queued submissions leave
/// in the order they arrived, whether the gate opens or closes.
pub struct ReadinessGate<T> {
    state: GateState<T>,
}

impl<T> Default for ReadinessGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadinessGate<T> {
    /// Create an unresolved gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: GateState::Connecting(VecDeque::new()),
        }
    }

    /// Offer a submission to the gate.
    pub fn submit(&mut self, item: T) -> Admit<T> {
        match &mut self.state {
            GateState::Connecting(pending) => {
                pending.push_back(item);
                tracing::debug!(pending = pending.len(), "Submission waiting for open");
                Admit::Deferred
            }
            GateState::Open => Admit::Ready(item),
            GateState::Closed => Admit::Rejected(item),
        }
    }

    /// Resolve the gate, returning queued submissions in FIFO order.
    ///
    /// Has no effect once the gate is open or closed.
    pub fn open(&mut self) -> VecDeque<T> {
        match std::mem::replace(&mut self.state, GateState::Open) {
            GateState::Connecting(pending) => pending,
            GateState::Open => VecDeque::new(),
            GateState::Closed => {
                self.state = GateState::Closed;
                VecDeque::new()
            }
        }
    }

    /// Close the gate, returning submissions that never went out, in FIFO order.
    pub fn close(&mut self) -> VecDeque<T> {
        match std::mem::replace(&mut self.state, GateState::Closed) {
            GateState::Connecting(pending) => pending,
            GateState::Open | GateState::Closed => VecDeque::new(),
        }
    }

    /// Whether the connection has opened and not closed since.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, GateState::Open)
    }

    /// Whether the gate closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, GateState::Closed)
    }

    /// Number of queued submissions.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &self.state {
            GateState::Connecting(pending) => pending.len(),
            GateState::Open | GateState::Closed => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submissions_wait_then_drain_in_order() {
        let mut gate = ReadinessGate::new();
        assert_eq!(gate.submit("start_job"), Admit::Deferred);
        assert_eq!(gate.submit("stdin"), Admit::Deferred);
        assert_eq!(gate.pending(), 2);

        let drained: Vec<_> = gate.open().into_iter().collect();
        assert_eq!(drained, vec!["start_job", "stdin"]);
        assert!(gate.is_open());
        assert_eq!(gate.submit("later"), Admit::Ready("later"));
    }

    #[test]
    fn test_close_before_open_rejects_in_order() {
        let mut gate = ReadinessGate::new();
        gate.submit(1);
        gate.submit(2);
        let rejected: Vec<_> = gate.close().into_iter().collect();
        assert_eq!(rejected, vec![1, 2]);
        assert!(gate.is_closed());
        assert_eq!(gate.submit(3), Admit::Rejected(3));
    }

    #[test]
    fn test_resolves_only_once() {
        let mut gate = ReadinessGate::<u8>::new();
        assert!(gate.open().is_empty());
        assert!(gate.open().is_empty());
        assert!(gate.is_open());

        assert!(gate.close().is_empty());
        assert!(gate.open().is_empty());
        assert!(gate.is_closed());
    }
}
