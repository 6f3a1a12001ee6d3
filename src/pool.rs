//! Worker pool: owns one requester connection per live worker.
//!
//! ```text
//!            ┌──────────── WorkerPool ────────────┐
//! dispatch ─▶│ WorkerRecord ─ RequesterConnection │─▶ worker 1
//! broadcast ▶│ WorkerRecord ─ RequesterConnection │─▶ worker 2
//!            └────────────────────────────────────┘
//! ```
//!
//! The pool is the only owner of worker records. Each record has a watcher
//! task that notices when its transport closes without the pool asking for
//! it: the record is marked `Crashed`, removed, and its pending requests fail
//! with `WorkerCrashed`. Respawning is left to the caller, who can follow
//! state changes through [`WorkerPool::subscribe`].

mod handshake;
mod handshake_timeout;
mod launcher;
mod process;
mod record;
mod shutdown;
mod shutdown_timeout;
mod worker_id;
mod worker_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};
use crate::requester::RequesterConnection;

pub use handshake::{READY_METHOD, WithHandshake};
pub use handshake_timeout::HandshakeTimeout;
pub use launcher::{InProcessLauncher, LaunchedWorker, WorkerLauncher};
pub use process::{ProcessLauncher, WORKER_ID_ENV};
pub use shutdown_timeout::GlobalShutdownTimeout;
pub use worker_id::WorkerId;
pub use worker_state::{WorkerEvent, WorkerState};

use handshake::perform_handshake;
use record::WorkerRecord;

/// Capacity of the state event channel; slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tunables of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSettings {
    pub handshake_timeout: HandshakeTimeout,
    /// Deadline applied to each dispatched request; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    pub shutdown_timeout: GlobalShutdownTimeout,
}

/// Dispatcher over a set of workers started by one launcher.
///
/// # Usage
///
/// ```ignore
/// let pool = WorkerPool::new(ProcessLauncher::new(command));
/// let worker = pool.spawn().await?;
/// let replies = pool.dispatch(worker, json!({"test": "login"})).await?;
/// let all = pool.broadcast(json!("reset")).await;
/// pool.shutdown_all().await;
/// ```
pub struct WorkerPool<L> {
    launcher: L,
    workers: Arc<DashMap<WorkerId, Arc<WorkerRecord>>>,
    events: broadcast::Sender<WorkerEvent>,
    settings: PoolSettings,
    /// Stops watcher tasks when the pool goes away
    watch_token: CancellationToken,
}

impl<L: WorkerLauncher> WorkerPool<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_settings(launcher, PoolSettings::default())
    }

    pub fn with_settings(launcher: L, settings: PoolSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            launcher,
            workers: Arc::new(DashMap::new()),
            events,
            settings,
            watch_token: CancellationToken::new(),
        }
    }

    /// Launch a worker and wait until it passed the readiness handshake.
    ///
    /// The worker is registered as `Starting` as soon as it is launched and
    /// becomes `Ready` once it answered the probe. If the handshake fails the
    /// worker is torn down and marked `Crashed`.
    pub async fn spawn(&self) -> BridgeResult<WorkerId> {
        let id = WorkerId::new();
        let LaunchedWorker { transport, child } = self
            .launcher
            .launch(id)
            .await
            .map_err(|source| BridgeError::Launch { worker: id, source })?;

        let record = Arc::new(WorkerRecord::new(
            id,
            RequesterConnection::new(transport),
            child,
            self.events.clone(),
        ));
        self.workers.insert(id, Arc::clone(&record));
        self.watch(Arc::clone(&record));

        match perform_handshake(record.connection(), self.settings.handshake_timeout).await {
            Ok(()) if record.transition(WorkerState::Ready) => {
                info!(target: "workbridge::pool", "Worker {} ready", id);
                Ok(id)
            }
            Ok(()) => Err(BridgeError::Handshake {
                worker: id,
                message: format!("worker became {:?} during handshake", record.state()),
            }),
            Err(message) => {
                warn!(
                    target: "workbridge::pool",
                    "Handshake with worker {} failed: {}",
                    id,
                    message
                );
                self.workers.remove(&id);
                record.mark_crashed();
                record.connection().close().await;
                record.terminate().await;
                Err(BridgeError::Handshake {
                    worker: id,
                    message,
                })
            }
        }
    }

    /// Send a request to one worker and wait for all of its replies.
    ///
    /// Fails without suspending with `UnknownWorker` if the id is not a live
    /// worker. `Starting` workers accept requests.
    pub async fn dispatch(&self, worker: WorkerId, request: Value) -> BridgeResult<Vec<Value>> {
        let record = self.live_record(worker)?;
        send_to_worker(&record, request, self.settings.request_timeout).await
    }

    /// Send the same request to every `Ready` or `Busy` worker concurrently.
    ///
    /// Resolves once every worker settled. One worker failing never cancels
    /// the others; each outcome is reported under its worker id.
    pub async fn broadcast(&self, request: Value) -> HashMap<WorkerId, BridgeResult<Vec<Value>>> {
        let targets: Vec<Arc<WorkerRecord>> = self
            .workers
            .iter()
            .filter(|entry| entry.value().state().is_ready())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let expected: Vec<WorkerId> = targets.iter().map(|record| record.id()).collect();

        debug!(
            target: "workbridge::pool",
            "Broadcasting to {} worker(s)",
            targets.len()
        );

        let timeout = self.settings.request_timeout;
        let mut join_set = JoinSet::new();
        for record in targets {
            let request = request.clone();
            join_set.spawn(async move {
                let result = send_to_worker(&record, request, timeout).await;
                (record.id(), result)
            });
        }

        let mut results = HashMap::with_capacity(expected.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    results.insert(id, result);
                }
                Err(e) => error!(
                    target: "workbridge::pool",
                    "Broadcast task panicked: {}",
                    e
                ),
            }
        }
        for id in expected {
            results
                .entry(id)
                .or_insert_with(|| Err(BridgeError::internal("broadcast task failed")));
        }
        results
    }

    /// Subscribe to worker state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Current state of a worker, `None` once it left the pool.
    pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        self.workers.get(&worker).map(|record| record.state())
    }

    /// Ids of all registered workers, sorted.
    pub fn workers(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn live_record(&self, worker: WorkerId) -> BridgeResult<Arc<WorkerRecord>> {
        // Clone out of the map so no shard lock is held across an await
        let record = self
            .workers
            .get(&worker)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(BridgeError::UnknownWorker { worker })?;
        if record.state().is_terminal() {
            return Err(BridgeError::UnknownWorker { worker });
        }
        Ok(record)
    }

    /// Watch a record's connection and handle crashes.
    fn watch(&self, record: Arc<WorkerRecord>) {
        let workers = Arc::clone(&self.workers);
        let token = self.watch_token.clone();
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = token.cancelled() => return,
                reason = record.connection().closed() => reason,
            };
            if reason.is_requested() {
                return;
            }
            if record.mark_crashed() {
                let id = record.id();
                workers.remove_if(&id, |_, current| Arc::ptr_eq(current, &record));
                record.connection().close().await;
                record.terminate().await;
            }
        });
    }
}

impl<L> Drop for WorkerPool<L> {
    fn drop(&mut self) {
        // Records are dropped with the map; their connections close and
        // child processes are killed on drop
        self.watch_token.cancel();
    }
}

/// Send to one worker, keeping it `Busy` for the duration.
async fn send_to_worker(
    record: &WorkerRecord,
    request: Value,
    timeout: Option<Duration>,
) -> BridgeResult<Vec<Value>> {
    let worker = record.id();
    let Some(_busy) = record.begin_request() else {
        return Err(BridgeError::UnknownWorker { worker });
    };

    let result = match timeout {
        Some(timeout) => record.connection().send_with_timeout(request, timeout).await,
        None => record.connection().send(request).await,
    };

    result.map_err(|e| match e {
        BridgeError::ConnectionClosed { reason } if !reason.is_requested() => {
            BridgeError::WorkerCrashed { worker, reason }
        }
        other => other,
    })
}
