//! Correlated request/response messaging between an orchestrator and a pool
//! of workers.
//!
//! - [`transport`]: ordered envelope channels (in-process, framed byte streams)
//! - [`requester::RequesterConnection`]: orchestrator side, `send()` and wait
//! - [`responder::ResponderConnection`]: worker side, runs a [`RequestHandler`]
//! - [`pool::WorkerPool`]: spawns workers, dispatches and broadcasts requests

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod requester;
pub mod responder;
pub mod transport;

pub use connection::{CloseReason, ConnectionState};
pub use error::{BridgeError, BridgeResult};
pub use pool::{
    InProcessLauncher, PoolSettings, ProcessLauncher, WithHandshake, WorkerEvent, WorkerId,
    WorkerLauncher, WorkerPool, WorkerState,
};
pub use protocol::{CorrelationId, Envelope, EnvelopeKind, HandlerError};
pub use requester::RequesterConnection;
pub use responder::{Progress, RequestHandler, ResponderConnection};
pub use transport::{FramedTransport, Transport, channel_pair};
