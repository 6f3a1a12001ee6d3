//! Correlation id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::CorrelationId;

/// Monotonic correlation id source for one connection.
///
/// Each call returns the next id in the sequence (1, 2, 3, ...). A `u64`
/// counter never wraps within a connection's lifetime, so ids are unique
/// among outstanding requests without consulting the pending table.
#[derive(Debug)]
pub(crate) struct CorrelationIdGenerator {
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> CorrelationId {
        CorrelationId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
