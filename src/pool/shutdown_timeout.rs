//! Global shutdown timeout for the worker pool.

use std::io;
use std::time::Duration;

/// Single ceiling for tearing down every worker of a pool.
///
/// All workers shut down in parallel under this timeout. When it expires,
/// the remaining workers are force-killed.
///
/// # Valid Range
///
/// - Minimum: 100 milliseconds
/// - Maximum: 60 seconds
/// - Default: 10 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalShutdownTimeout(Duration);

impl GlobalShutdownTimeout {
    const DEFAULT: Duration = Duration::from_secs(10);
    const MIN: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(60);

    /// Create a new GlobalShutdownTimeout with validation.
    ///
    /// Returns an `InvalidInput` error if `duration` is out of range.
    pub fn new(duration: Duration) -> io::Result<Self> {
        if duration < Self::MIN || duration > Self::MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Global shutdown timeout must be between {:?} and {:?}, got {:?}",
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

impl Default for GlobalShutdownTimeout {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}
