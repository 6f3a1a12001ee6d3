//! Worker identity.

use std::fmt;
use std::str::FromStr;

use ulid::Ulid;

/// Identifier of one worker in a pool.
///
/// ULID based: unique across pools and processes, and sortable by spawn time.
/// Exported to worker processes as `WORKBRIDGE_WORKER_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(Ulid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkerId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn display_parses_back() {
        let id = WorkerId::new();
        let parsed: WorkerId = id.to_string().parse().expect("ULID text should parse");
        assert_eq!(parsed, id);
    }
}
