//! Bounded retry of platform calls with exponential backoff.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use repo_model::{ApiResult, ErrorClass};

use crate::document::ReconcileOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; never less than one.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReconcileOptions::default())
    }
}

impl From<&ReconcileOptions> for RetryPolicy {
    fn from(options: &ReconcileOptions) -> Self {
        Self {
            max_attempts: options.max_attempts.max(1),
            initial_interval: Duration::from_millis(options.initial_backoff_ms),
            max_interval: Duration::from_millis(options.max_backoff_ms.max(options.initial_backoff_ms)),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Run `call`, retrying transient failures until it succeeds, fails with
    /// a non-transient error, or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, call: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.run_retrying(what, |class| class == ErrorClass::Transient, call).await
    }

    /// Like [`run`](Self::run), retrying every error class `retryable` accepts.
    pub async fn run_retrying<T, F, Fut, P>(&self, what: &str, retryable: P, mut call: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
        P: Fn(ErrorClass) -> bool,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if retryable(error.class()) && attempt < self.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.max_interval);
                    tracing::warn!(
                        call = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retryable failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_model::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("list labels", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::rate_limited())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ApiResult<()> = fast(3)
            .run("create label", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new(502, "bad gateway"))
            })
            .await;

        assert_eq!(result.unwrap_err().status, 502);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_is_retried_only_when_asked() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let lagging = || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::not_found("environment production"))
            } else {
                Ok(7)
            }
        };

        let plain = fast(3).run("create secret", lagging).await;
        assert_eq!(plain.unwrap_err().status, 404);

        counter.store(0, Ordering::SeqCst);
        let retried = fast(3)
            .run_retrying(
                "create secret",
                |class| matches!(class, ErrorClass::Transient | ErrorClass::NotFound),
                lagging,
            )
            .await;
        assert_eq!(retried, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ApiResult<()> = fast(5)
            .run("update ruleset", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::forbidden("resource not accessible by integration"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
