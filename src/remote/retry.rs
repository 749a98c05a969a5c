//! Bounded retry with exponential backoff and jitter.
//!
//! Only transient failures (service-side errors, transport errors) are
//! retried; anything the caller can act on is returned immediately.

use std::thread;
use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::remote::RemoteError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Quick checks against the service.
    pub fn status_checks() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 1.2,
            max_jitter: Duration::from_secs(1),
        }
    }

    /// Large uploads, worth waiting longer between attempts.
    pub fn uploads() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            backoff_factor: 5.0,
            max_jitter: Duration::from_secs(5),
        }
    }

    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn run<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut delay = self.initial_delay;
        let mut remaining = self.max_attempts.max(1);
        loop {
            remaining -= 1;
            match attempt() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && remaining > 0 => {
                    let jitter = if self.max_jitter.is_zero() {
                        Duration::ZERO
                    } else {
                        rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter)
                    };
                    warn!(
                        "{operation} failed ({error}), retrying in {:?} \
                         ({remaining} attempt(s) left)",
                        delay + jitter
                    );
                    thread::sleep(delay + jitter);
                    delay = delay.mul_f64(self.backoff_factor);
                }
                Err(error) if error.is_transient() => {
                    return Err(RemoteError::RetriesExhausted {
                        operation: operation.to_string(),
                        source: Box::new(error),
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn transient() -> RemoteError {
        RemoteError::Service {
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(5).run("poke the service", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(transient())
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_retries_surface_the_last_failure() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3).run("poke the service", || {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert_eq!(calls.get(), 3);
        match result.unwrap_err() {
            RemoteError::RetriesExhausted { operation, source } => {
                assert_eq!(operation, "poke the service");
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5).run("poke the service", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Client {
                status: 400,
                body: "bad request".to_string(),
            })
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(result.unwrap_err(), RemoteError::Client { .. }));
    }

    #[test]
    fn missing_submissions_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5).run("check status", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::SubmissionNotFound {
                id: "sub-1".to_string(),
            })
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(
            result.unwrap_err(),
            RemoteError::SubmissionNotFound { .. }
        ));
    }
}
