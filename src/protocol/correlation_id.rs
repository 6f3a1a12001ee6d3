//! Correlation id type linking a request to its replies.
//!
//! This module provides a type-safe wrapper for correlation ids, preventing
//! confusion with other integer types such as payload counts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation id of one request on one connection.
///
/// Wraps `u64` so it can be used as a `HashMap` key for pending-request
/// tracking. Ids are only unique per connection; two connections may hand out
/// the same value concurrently.
///
/// # Wire Format
///
/// Serialized as a bare JSON number (`"correlationId": 7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Create a new CorrelationId from a u64 value.
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<CorrelationId> for u64 {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}
