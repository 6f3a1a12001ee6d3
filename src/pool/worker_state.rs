//! Worker state machine and the events it publishes.

use super::WorkerId;

/// State of a worker record.
///
/// State transitions:
/// - Starting -> Ready (handshake complete)
/// - Ready <-> Busy (requests in flight / all settled)
/// - Starting | Ready | Busy -> Closed (pool shut the worker down)
/// - Starting | Ready | Busy -> Crashed (transport closed without the pool asking)
///
/// `Closed` and `Crashed` are terminal; records in them are removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Launched, readiness handshake pending
    Starting,
    /// Idle and accepting requests
    Ready,
    /// At least one request in flight
    Busy,
    /// Shut down by the pool (terminal state)
    Closed,
    /// Lost without the pool asking (terminal state)
    Crashed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Closed | WorkerState::Crashed)
    }

    /// Whether `broadcast()` targets workers in this state.
    pub fn is_ready(self) -> bool {
        matches!(self, WorkerState::Ready | WorkerState::Busy)
    }

    pub(crate) fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Closed | Crashed, _) => false,
            (Starting, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            (_, Closed | Crashed) => true,
            _ => false,
        }
    }
}

/// Published on every worker state change.
///
/// `previous` is `None` for the event announcing a freshly launched worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerEvent {
    pub worker: WorkerId,
    pub previous: Option<WorkerState>,
    pub current: WorkerState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(WorkerState::Starting, WorkerState::Ready, true)]
    #[case(WorkerState::Starting, WorkerState::Busy, false)]
    #[case(WorkerState::Starting, WorkerState::Crashed, true)]
    #[case(WorkerState::Ready, WorkerState::Busy, true)]
    #[case(WorkerState::Busy, WorkerState::Ready, true)]
    #[case(WorkerState::Busy, WorkerState::Closed, true)]
    #[case(WorkerState::Ready, WorkerState::Starting, false)]
    #[case(WorkerState::Closed, WorkerState::Ready, false)]
    #[case(WorkerState::Crashed, WorkerState::Closed, false)]
    #[case(WorkerState::Closed, WorkerState::Crashed, false)]
    fn transitions(#[case] from: WorkerState, #[case] to: WorkerState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed, "{:?} -> {:?}", from, to);
    }

    #[test]
    fn only_ready_and_busy_receive_broadcasts() {
        assert!(WorkerState::Ready.is_ready());
        assert!(WorkerState::Busy.is_ready());
        assert!(!WorkerState::Starting.is_ready());
        assert!(!WorkerState::Crashed.is_ready());
    }
}
