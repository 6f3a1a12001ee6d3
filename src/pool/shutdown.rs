//! Shutdown coordination for pooled workers.
//!
//! Deliberate teardown marks records `Closed` before their connection closes,
//! so the watcher never mistakes it for a crash.

use std::sync::Arc;

use log::{debug, error, warn};
use tokio::task::JoinSet;

use super::record::WorkerRecord;
use super::{GlobalShutdownTimeout, WorkerId, WorkerLauncher, WorkerPool};
use crate::error::{BridgeError, BridgeResult};

impl<L: WorkerLauncher> WorkerPool<L> {
    /// Drains a JoinSet, logging any task panics with the provided context.
    async fn drain_join_set(join_set: &mut JoinSet<()>, task_context: &str) {
        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                error!(
                    target: "workbridge::pool",
                    "{} panicked: {}",
                    task_context,
                    e
                );
            }
        }
    }

    /// Shut one worker down and remove it from the pool.
    ///
    /// Pending requests on the worker fail with `ConnectionClosed`. The
    /// worker process, if any, gets stdin EOF, then SIGTERM, then SIGKILL.
    pub async fn shutdown(&self, worker: WorkerId) -> BridgeResult<()> {
        let Some((_, record)) = self.workers.remove(&worker) else {
            return Err(BridgeError::UnknownWorker { worker });
        };
        debug!(target: "workbridge::pool", "Shutting down worker {}", worker);
        record.shutdown().await;
        Ok(())
    }

    /// Shut every worker down under the configured global timeout.
    pub async fn shutdown_all(&self) {
        self.shutdown_all_with_timeout(self.settings.shutdown_timeout)
            .await;
    }

    /// Shut every worker down in parallel under a single global ceiling.
    ///
    /// # Behavior
    ///
    /// 1. All records leave the pool and begin graceful shutdown in parallel
    /// 2. If the timeout expires first, the remaining shutdown tasks are
    ///    aborted and their processes are killed
    pub async fn shutdown_all_with_timeout(&self, timeout: GlobalShutdownTimeout) {
        let ids: Vec<WorkerId> = self.workers.iter().map(|entry| *entry.key()).collect();
        let records: Vec<Arc<WorkerRecord>> = ids
            .into_iter()
            .filter_map(|id| self.workers.remove(&id).map(|(_, record)| record))
            .collect();

        if records.is_empty() {
            return;
        }

        let mut join_set = JoinSet::new();
        for record in &records {
            let record = Arc::clone(record);
            join_set.spawn(async move {
                record.shutdown().await;
            });
        }

        let graceful_result = tokio::time::timeout(
            timeout.as_duration(),
            Self::drain_join_set(&mut join_set, "Shutdown task"),
        )
        .await;

        if graceful_result.is_err() {
            warn!(
                target: "workbridge::pool",
                "Global shutdown timeout ({:?}) expired, force-killing remaining workers",
                timeout.as_duration()
            );
            join_set.abort_all();
            Self::drain_join_set(&mut join_set, "Shutdown task").await;
            self.force_kill_all(records).await;
        }
    }

    /// Kill every worker process still owned by `records`, in parallel.
    async fn force_kill_all(&self, records: Vec<Arc<WorkerRecord>>) {
        let mut join_set = JoinSet::new();
        for record in records {
            join_set.spawn(async move {
                record.force_kill().await;
            });
        }
        Self::drain_join_set(&mut join_set, "Force-kill task").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{InProcessLauncher, WorkerState};
    use crate::protocol::HandlerError;
    use crate::responder::Progress;
    use serde_json::{Value, json};
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_rejects_requests_in_flight() {
        let pool = Arc::new(WorkerPool::new(InProcessLauncher::new(|_worker: WorkerId| {
            |_request: Value, _progress: Progress| async move {
                std::future::pending::<()>().await;
                Ok::<_, HandlerError>(json!("never"))
            }
        })));
        let worker = pool.spawn().await.unwrap();

        let call = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.dispatch(worker, json!("hang")).await })
        };
        while pool.state(worker) != Some(WorkerState::Busy) {
            tokio::task::yield_now().await;
        }

        pool.shutdown(worker).await.unwrap();
        let err = call.await.unwrap().unwrap_err();
        assert!(
            matches!(err, BridgeError::ConnectionClosed { .. }),
            "deliberate shutdown is not a crash: {:?}",
            err
        );
    }

    #[tokio::test]
    async fn shutdown_all_completes_within_timeout() {
        let pool = WorkerPool::new(InProcessLauncher::new(|_worker: WorkerId| {
            |request: Value, _progress: Progress| async move { Ok::<_, HandlerError>(request) }
        }));
        for _ in 0..4 {
            pool.spawn().await.unwrap();
        }

        let timeout = GlobalShutdownTimeout::new(Duration::from_secs(5)).unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            pool.shutdown_all_with_timeout(timeout),
        )
        .await
        .expect("shutdown should finish");
        assert!(pool.is_empty());
    }
}
