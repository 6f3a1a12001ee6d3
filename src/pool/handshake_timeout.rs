//! Readiness handshake timeout.

use std::io;
use std::time::Duration;

/// How long `spawn()` waits for a new worker to answer the readiness probe.
///
/// Workers that need to boot a browser take a while, so the default is
/// generous. A worker that misses the deadline is torn down and reported as a
/// handshake failure.
///
/// # Valid Range
///
/// - Minimum: 10 milliseconds
/// - Maximum: 300 seconds
/// - Default: 30 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeout(Duration);

impl HandshakeTimeout {
    const DEFAULT: Duration = Duration::from_secs(30);
    const MIN: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(300);

    /// Create a new HandshakeTimeout with validation.
    ///
    /// Returns an `InvalidInput` error if `duration` is out of range.
    pub fn new(duration: Duration) -> io::Result<Self> {
        if duration < Self::MIN || duration > Self::MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Handshake timeout must be between {:?} and {:?}, got {:?}",
                    Self::MIN,
                    Self::MAX,
                    duration
                ),
            ));
        }
        Ok(Self(duration))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for HandshakeTimeout {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_inclusive() {
        assert!(HandshakeTimeout::new(Duration::from_millis(10)).is_ok());
        assert!(HandshakeTimeout::new(Duration::from_secs(300)).is_ok());
        assert!(HandshakeTimeout::new(Duration::from_millis(9)).is_err());
        assert!(HandshakeTimeout::new(Duration::from_millis(300_001)).is_err());
    }

    #[test]
    fn default_is_thirty_seconds() {
        assert_eq!(HandshakeTimeout::default().as_duration(), Duration::from_secs(30));
    }
}
