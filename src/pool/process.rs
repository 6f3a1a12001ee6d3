//! Out-of-process workers: spawning and terminating child processes.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::WorkerId;
use super::launcher::{LaunchedWorker, WorkerLauncher};
use crate::transport::FramedTransport;

/// Environment variable carrying the worker id into the child process.
pub const WORKER_ID_ENV: &str = "WORKBRIDGE_WORKER_ID";

/// Launches each worker as a child process speaking framed JSON on stdio.
///
/// The child's stderr is inherited so worker logs end up next to the
/// orchestrator's. Children are killed if their record is dropped without a
/// shutdown.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: Vec<String>,
}

impl ProcessLauncher {
    /// `command[0]` is the program, the rest its arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Transport = FramedTransport<ChildStdout, ChildStdin>;

    async fn launch(&self, worker: WorkerId) -> io::Result<LaunchedWorker<Self::Transport>> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker command is empty",
            ));
        };

        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_ID_ENV, worker.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout was not captured"))?;

        debug!(
            target: "workbridge::pool",
            "Launched worker {} (pid {:?}): {}",
            worker,
            child.id(),
            self.command.join(" ")
        );

        Ok(LaunchedWorker {
            transport: FramedTransport::new(stdout, stdin),
            child: Some(child),
        })
    }
}

/// Terminate a worker process whose connection is already closed.
///
/// # Escalation
///
/// 1. Wait up to `grace` for the worker to exit on stdin EOF
/// 2. Unix: send SIGTERM and wait up to `grace` again
/// 3. Kill the process
pub(crate) async fn terminate_with_escalation(worker: WorkerId, child: &mut Child, grace: Duration) {
    if wait_for_exit(worker, child, grace).await {
        return;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        debug!(
            target: "workbridge::pool",
            "Worker {} still running after {:?}, sending SIGTERM",
            worker,
            grace
        );
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(target: "workbridge::pool", "SIGTERM to worker {} failed: {}", worker, e);
        }
        if wait_for_exit(worker, child, grace).await {
            return;
        }
    }

    force_kill(worker, child).await;
}

/// Kill the worker process immediately and reap it.
pub(crate) async fn force_kill(worker: WorkerId, child: &mut Child) {
    warn!(target: "workbridge::pool", "Killing worker {}", worker);
    if let Err(e) = child.kill().await {
        debug!(target: "workbridge::pool", "Killing worker {} failed: {}", worker, e);
    }
}

async fn wait_for_exit(worker: WorkerId, child: &mut Child, grace: Duration) -> bool {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(target: "workbridge::pool", "Worker {} exited: {}", worker, status);
            true
        }
        Ok(Err(e)) => {
            debug!(target: "workbridge::pool", "Waiting for worker {} failed: {}", worker, e);
            true
        }
        Err(_) => false,
    }
}
