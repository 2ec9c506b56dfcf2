use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tonic::{Code, Status};
use tracing::{debug, warn};

/// Default number of attempts per call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(700);

/// Returns true if a call that failed with `code` may be tried again.
pub fn is_retryable(code: Code) -> bool {
    !matches!(
        code,
        Code::Ok
            | Code::Cancelled
            | Code::DeadlineExceeded
            | Code::InvalidArgument
            | Code::Internal
            | Code::PermissionDenied
            | Code::Unauthenticated
            | Code::Unimplemented
            | Code::Unknown
    )
}

/// Bounded retry with a fixed delay for unary calls.
///
/// When the caller's deadline passes during a delay the call ends with
/// `DeadlineExceeded`, except after an `Unavailable` failure: then one more
/// delay and one last attempt (bounded by that same delay) are allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Maximum attempts per call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `attempt` until it succeeds, fails permanently, runs out of
    /// attempts or runs out of time.
    ///
    /// `attempt` receives the time left for that attempt, which callers should
    /// forward as the request's gRPC timeout. Each attempt is also cut off
    /// locally when that time runs out.
    pub async fn run<T, F, Fut>(&self, deadline: Option<Duration>, mut attempt: F) -> Result<T, Status>
    where
        F: FnMut(Option<Duration>) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let deadline = deadline.map(|d| Instant::now() + d);
        let mut attempts = 0;
        let mut grace = false;

        loop {
            let budget = if grace {
                Some(self.delay)
            } else {
                match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(Status::deadline_exceeded("deadline exceeded before attempt"));
                        }
                        Some(deadline - now)
                    }
                    None => None,
                }
            };

            attempts += 1;
            let result = match budget {
                Some(budget) => timeout(budget, attempt(Some(budget)))
                    .await
                    .unwrap_or_else(|_| Err(Status::deadline_exceeded("attempt timed out"))),
                None => attempt(None).await,
            };

            let status = match result {
                Ok(value) => return Ok(value),
                Err(status) => status,
            };

            debug!(attempt = attempts, code = ?status.code(), "call failed");

            if !is_retryable(status.code()) {
                return Err(status);
            }
            if grace {
                warn!(attempt = attempts, "grace attempt failed, giving up");
                return Err(Status::deadline_exceeded(format!(
                    "deadline exceeded after {attempts} attempts: {}",
                    status.message()
                )));
            }
            if attempts >= self.max_attempts {
                warn!(attempts, code = ?status.code(), "retries exhausted");
                return Err(status);
            }

            counter!("client.retries").increment(1);

            match deadline {
                Some(deadline) if Instant::now() + self.delay > deadline => {
                    sleep_until(deadline).await;
                    if status.code() != Code::Unavailable {
                        return Err(Status::deadline_exceeded(format!(
                            "deadline exceeded while waiting to retry: {}",
                            status.message()
                        )));
                    }
                    debug!(attempt = attempts, "deadline passed on unavailable server, one grace retry");
                    sleep(self.delay).await;
                    grace = true;
                }
                _ => sleep(self.delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Runs `policy` against a scripted sequence of outcomes. The last entry
    /// repeats once the script runs out.
    async fn run_script(
        policy: RetryPolicy,
        deadline: Option<Duration>,
        script: &[Code],
    ) -> (Result<u32, Status>, usize) {
        let calls = AtomicUsize::new(0);
        let result = policy
            .run(deadline, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let code = script[n.min(script.len() - 1)];
                async move {
                    if code == Code::Ok {
                        Ok(n as u32 + 1)
                    } else {
                        Err(Status::new(code, "scripted"))
                    }
                }
            })
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[test]
    fn classifies_codes() {
        assert!(is_retryable(Code::Unavailable));
        assert!(is_retryable(Code::ResourceExhausted));
        assert!(is_retryable(Code::Aborted));
        assert!(!is_retryable(Code::InvalidArgument));
        assert!(!is_retryable(Code::Unauthenticated));
        assert!(!is_retryable(Code::DeadlineExceeded));
        assert!(!is_retryable(Code::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let start = Instant::now();
        let (result, calls) = run_script(
            RetryPolicy::default(),
            None,
            &[Code::Unavailable, Code::Unavailable, Code::Ok],
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
        assert_eq!(start.elapsed(), DEFAULT_RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_stops_immediately() {
        let (result, calls) =
            run_script(RetryPolicy::default(), None, &[Code::InvalidArgument]).await;

        assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (result, calls) =
            run_script(RetryPolicy::default(), None, &[Code::Unavailable]).await;

        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_at_deadline_gets_one_grace_attempt() {
        let start = Instant::now();
        let (result, calls) = run_script(
            RetryPolicy::default(),
            Some(Duration::from_secs(1)),
            &[Code::Unavailable],
        )
        .await;

        // t=0 and t=700ms fit the deadline; the third attempt runs after the
        // grace delay that starts at t=1s.
        assert_eq!(result.unwrap_err().code(), Code::DeadlineExceeded);
        assert_eq!(calls, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1700));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_attempt_can_succeed() {
        let (result, calls) = run_script(
            RetryPolicy::default(),
            Some(Duration::from_millis(500)),
            &[Code::Unavailable, Code::Ok],
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_retryable_code_at_deadline_fails_fast() {
        let start = Instant::now();
        let (result, calls) = run_script(
            RetryPolicy::default(),
            Some(Duration::from_millis(300)),
            &[Code::ResourceExhausted],
        )
        .await;

        assert_eq!(result.unwrap_err().code(), Code::DeadlineExceeded);
        assert_eq!(calls, 1);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_is_cut_off_at_deadline() {
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result: Result<(), Status> = policy
            .run(Some(Duration::from_millis(200)), |budget| async move {
                assert_eq!(budget, Some(Duration::from_millis(200)));
                sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().code(), Code::DeadlineExceeded);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
