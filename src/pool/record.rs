//! Per-worker record owned by the pool.

use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Child;
use tokio::sync::broadcast;

use super::process::{force_kill, terminate_with_escalation};
use super::{WorkerEvent, WorkerId, WorkerState};
use crate::error::LockResultExt;
use crate::requester::RequesterConnection;

/// Grace period a worker process gets at each escalation step.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// One live (or dying) worker: its connection, state and process.
pub(crate) struct WorkerRecord {
    id: WorkerId,
    connection: RequesterConnection,
    status: Mutex<Status>,
    /// Taken by whichever teardown path runs first
    child: tokio::sync::Mutex<Option<Child>>,
    events: broadcast::Sender<WorkerEvent>,
}

struct Status {
    state: WorkerState,
    in_flight: usize,
}

/// Keeps the worker `Busy` while a request is in flight.
pub(crate) struct BusyGuard<'a> {
    record: &'a WorkerRecord,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.record.end_request();
    }
}

impl WorkerRecord {
    /// Create a record in `Starting` state and announce it.
    pub(crate) fn new(
        id: WorkerId,
        connection: RequesterConnection,
        child: Option<Child>,
        events: broadcast::Sender<WorkerEvent>,
    ) -> Self {
        let record = Self {
            id,
            connection,
            status: Mutex::new(Status {
                state: WorkerState::Starting,
                in_flight: 0,
            }),
            child: tokio::sync::Mutex::new(child),
            events,
        };
        record.publish(None, WorkerState::Starting);
        record
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn connection(&self) -> &RequesterConnection {
        &self.connection
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.status.lock().recover_poison("WorkerRecord::state()").state
    }

    /// Move to `next` if the transition is valid.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn transition(&self, next: WorkerState) -> bool {
        let mut status = self.status.lock().recover_poison("WorkerRecord::transition()");
        let previous = status.state;
        if !previous.can_transition_to(next) {
            return false;
        }
        // Ready with requests in flight is Busy
        status.state = if next == WorkerState::Ready && status.in_flight > 0 {
            WorkerState::Busy
        } else {
            next
        };
        // Published under the lock so subscribers observe transitions in order
        self.publish(Some(previous), status.state);
        true
    }

    /// Count a request in flight, marking the worker `Busy`.
    ///
    /// Returns `None` if the worker is already `Closed` or `Crashed`.
    pub(crate) fn begin_request(&self) -> Option<BusyGuard<'_>> {
        let mut status = self.status.lock().recover_poison("WorkerRecord::begin_request()");
        if status.state.is_terminal() {
            return None;
        }
        status.in_flight += 1;
        if status.state == WorkerState::Ready {
            status.state = WorkerState::Busy;
            self.publish(Some(WorkerState::Ready), WorkerState::Busy);
        }
        Some(BusyGuard { record: self })
    }

    fn end_request(&self) {
        let mut status = self.status.lock().recover_poison("WorkerRecord::end_request()");
        status.in_flight = status.in_flight.saturating_sub(1);
        if status.in_flight == 0 && status.state == WorkerState::Busy {
            status.state = WorkerState::Ready;
            self.publish(Some(WorkerState::Busy), WorkerState::Ready);
        }
    }

    fn publish(&self, previous: Option<WorkerState>, current: WorkerState) {
        debug!(
            target: "workbridge::pool",
            "Worker {}: {:?} -> {:?}",
            self.id,
            previous,
            current
        );
        // No subscribers is fine
        let _ = self.events.send(WorkerEvent {
            worker: self.id,
            previous,
            current,
        });
    }

    /// Deliberate teardown: mark `Closed`, close the connection, stop the process.
    pub(crate) async fn shutdown(&self) {
        self.transition(WorkerState::Closed);
        self.connection.close().await;
        self.terminate().await;
    }

    /// Stop the worker process, if any, escalating as needed.
    pub(crate) async fn terminate(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            terminate_with_escalation(self.id, &mut child, TERMINATE_GRACE).await;
        }
    }

    /// Kill the worker process without waiting for it to exit on its own.
    pub(crate) async fn force_kill(&self) {
        self.transition(WorkerState::Closed);
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            force_kill(self.id, &mut child).await;
        }
    }

    /// Record a crash. Returns `false` if the worker was already terminal.
    pub(crate) fn mark_crashed(&self) -> bool {
        let crashed = self.transition(WorkerState::Crashed);
        if crashed {
            warn!(
                target: "workbridge::pool",
                "Worker {} crashed: {}",
                self.id,
                self.connection
                    .close_reason()
                    .map(|reason| reason.to_string())
                    .unwrap_or_else(|| "unknown reason".to_string())
            );
        }
        crashed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, channel_pair};

    fn record() -> (WorkerRecord, broadcast::Receiver<WorkerEvent>, ChannelTransport) {
        let (events, rx) = broadcast::channel(16);
        let (local, remote) = channel_pair();
        let record = WorkerRecord::new(WorkerId::new(), RequesterConnection::new(local), None, events);
        (record, rx, remote)
    }

    #[tokio::test]
    async fn busy_tracks_in_flight_requests() {
        let (record, _rx, _remote) = record();
        assert!(record.transition(WorkerState::Ready));

        let first = record.begin_request().unwrap();
        let second = record.begin_request().unwrap();
        assert_eq!(record.state(), WorkerState::Busy);

        drop(first);
        assert_eq!(record.state(), WorkerState::Busy, "one request still in flight");
        drop(second);
        assert_eq!(record.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn starting_worker_stays_starting_while_serving() {
        let (record, _rx, _remote) = record();
        let guard = record.begin_request().unwrap();
        assert_eq!(record.state(), WorkerState::Starting);

        assert!(record.transition(WorkerState::Ready));
        assert_eq!(record.state(), WorkerState::Busy, "ready with work in flight is busy");
        drop(guard);
        assert_eq!(record.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn terminal_record_refuses_requests() {
        let (record, _rx, _remote) = record();
        assert!(record.mark_crashed());
        assert!(!record.mark_crashed(), "crash is recorded once");
        assert!(record.begin_request().is_none());
        assert!(!record.transition(WorkerState::Ready));
    }

    #[tokio::test]
    async fn transitions_are_published_in_order() {
        let (record, mut rx, _remote) = record();
        record.transition(WorkerState::Ready);
        drop(record.begin_request());
        record.shutdown().await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push((event.previous, event.current));
        }
        assert_eq!(
            seen,
            vec![
                (None, WorkerState::Starting),
                (Some(WorkerState::Starting), WorkerState::Ready),
                (Some(WorkerState::Ready), WorkerState::Busy),
                (Some(WorkerState::Busy), WorkerState::Ready),
                (Some(WorkerState::Ready), WorkerState::Closed),
            ]
        );
    }
}
