//! Worker launchers: how the pool obtains a transport to a new worker.

use std::future::Future;
use std::io;

use log::debug;
use tokio::process::Child;

use super::WorkerId;
use super::handshake::WithHandshake;
use crate::responder::{RequestHandler, ResponderConnection};
use crate::transport::{ChannelTransport, Transport, channel_pair};

/// A launched worker: the orchestrator's end of its transport, plus the
/// child process when the worker runs out of process.
pub struct LaunchedWorker<T> {
    pub transport: T,
    pub child: Option<Child>,
}

/// Starts workers for a [`WorkerPool`](super::WorkerPool).
///
/// The launched worker must answer the readiness probe (see
/// [`WithHandshake`]) once it is able to serve requests.
pub trait WorkerLauncher: Send + Sync + 'static {
    type Transport: Transport;

    fn launch(
        &self,
        worker: WorkerId,
    ) -> impl Future<Output = io::Result<LaunchedWorker<Self::Transport>>> + Send;
}

/// Runs each worker as a responder task in this process over a channel pair.
///
/// `make_handler` builds a fresh handler per worker; it is wrapped in
/// [`WithHandshake`] automatically.
pub struct InProcessLauncher<F> {
    make_handler: F,
}

impl<F> InProcessLauncher<F> {
    pub fn new(make_handler: F) -> Self {
        Self { make_handler }
    }
}

impl<F, H> WorkerLauncher for InProcessLauncher<F>
where
    F: Fn(WorkerId) -> H + Send + Sync + 'static,
    H: RequestHandler,
{
    type Transport = ChannelTransport;

    async fn launch(&self, worker: WorkerId) -> io::Result<LaunchedWorker<ChannelTransport>> {
        let (orchestrator_end, worker_end) = channel_pair();
        let handler = WithHandshake::new((self.make_handler)(worker));

        tokio::spawn(async move {
            let responder = ResponderConnection::new(worker_end, handler);
            let reason = responder.closed().await;
            responder.close().await;
            debug!(
                target: "workbridge::pool",
                "In-process worker {} stopped: {}",
                worker,
                reason
            );
        });

        Ok(LaunchedWorker {
            transport: orchestrator_end,
            child: None,
        })
    }
}
