//! Wire protocol shared by both connection roles.
//!
//! Every message crossing a transport is an [`Envelope`] tagged with the
//! [`CorrelationId`] of the request it belongs to.

mod correlation_id;
mod envelope;
mod handler_error;

pub use correlation_id::CorrelationId;
pub use envelope::{Envelope, EnvelopeKind};
pub use handler_error::HandlerError;
