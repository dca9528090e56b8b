//! Bounded exponential backoff for udpgrm option calls
//!
//! The daemon answers `EAGAIN` while it holds the per-address state; a
//! handful of short retries is enough to get through.

use std::io;
use std::thread;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Used for every `setsockopt` towards udpgrm
    pub const SETSOCKOPT: RetryPolicy = RetryPolicy {
        max_attempts: 8,
        base_delay: Duration::from_millis(10),
        multiplier: 2,
    };

    /// Used while waiting for the daemon to assign a slot to a new socket
    pub const CONFIRM: RetryPolicy = RetryPolicy {
        max_attempts: 8,
        base_delay: Duration::from_millis(100),
        multiplier: 2,
    };

    /// No sleeping at all. Handy for tests and dry runs.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 2,
        }
    }

    /// Delay to wait after the given (zero based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt bound is hit. The last error is returned on exhaustion.
    pub fn retry<T, F, P>(&self, is_retryable: P, mut op: F) -> io::Result<T>
    where
        F: FnMut() -> io::Result<T>,
        P: Fn(&io::Error) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if is_retryable(&e) && attempt + 1 < self.max_attempts => {
                    let delay = self.delay(attempt);
                    trace!("Retryable error ({}), attempt {}, sleeping {:?}", e, attempt + 1, delay);
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll `op` until it yields a value. `Ok(None)` means the attempt bound
    /// was exhausted without one.
    pub fn poll<T, F>(&self, mut op: F) -> io::Result<Option<T>>
    where
        F: FnMut() -> io::Result<Option<T>>,
    {
        for attempt in 0..self.max_attempts {
            if let Some(v) = op()? {
                return Ok(Some(v));
            }
            if attempt + 1 < self.max_attempts {
                thread::sleep(self.delay(attempt));
            }
        }
        Ok(None)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::SETSOCKOPT
    }
}

/// `EAGAIN` is the only transient answer udpgrm gives
pub fn is_eagain(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EAGAIN)
}
