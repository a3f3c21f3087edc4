//! Bounded fixed-delay retries for the flaky steps of a session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Retry policy: at most `max_attempts` calls, `delay` between consecutive
/// attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    sleeper: Sleeper,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(10))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    /// Same attempt budget, no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Run `op` until it succeeds, `is_retryable` rejects the error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub fn run<T, E, F, P>(&self, what: &str, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    tracing::debug!(
                        "{what} failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                        self.max_attempts,
                        self.delay
                    );
                    (self.sleeper)(self.delay);
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::warn!("{what} failed after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// [`run`](Self::run) with every error considered retryable.
    pub fn retry<T, E, F>(&self, what: &str, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: fmt::Display,
    {
        self.run(what, |_| true, op)
    }
}

/// The retry budgets a session uses for each transient step.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    pub connect: RetryPolicy,
    pub open_workbook: RetryPolicy,
    pub logon: RetryPolicy,
    pub load_config: RetryPolicy,
}

impl RetryPolicies {
    /// Three attempts everywhere, never sleeping.
    pub fn immediate() -> Self {
        Self {
            connect: RetryPolicy::immediate(3),
            open_workbook: RetryPolicy::immediate(3),
            logon: RetryPolicy::immediate(3),
            load_config: RetryPolicy::immediate(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_policy(attempts: u32) -> (RetryPolicy, Arc<Mutex<Vec<Duration>>>) {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&waits);
        let policy = RetryPolicy::fixed(attempts, Duration::from_secs(10))
            .with_sleeper(move |d| sink.lock().unwrap().push(d));
        (policy, waits)
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let (policy, waits) = recording_policy(3);
        let result: Result<u32, String> = policy.retry("op", |attempt| {
            if attempt < 3 {
                Err(format!("transient {attempt}"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(*waits.lock().unwrap(), vec![Duration::from_secs(10); 2]);
    }

    #[test]
    fn test_returns_last_error_when_budget_spent() {
        let (policy, waits) = recording_policy(3);
        let mut calls = 0;
        let result: Result<(), String> = policy.retry("op", |attempt| {
            calls += 1;
            Err(format!("failure {attempt}"))
        });
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls, 3);
        assert_eq!(waits.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_non_retryable_error_stops_immediately() {
        let (policy, waits) = recording_policy(3);
        let mut calls = 0;
        let result: Result<(), &str> = policy.run(
            "op",
            |e| *e != "fatal",
            |_| {
                calls += 1;
                Err("fatal")
            },
        );
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls, 1);
        assert!(waits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::immediate(0);
        let result: Result<i32, String> = policy.retry("op", |_| Ok(7));
        assert_eq!(result, Ok(7));
    }
}
