// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utilities for retrying cluster calls with exponential backoff

use crate::config::ErrorBackoffConfig;
use crate::config::RetryConfig;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::future::Future;
use std::time::Duration;

pub use ::backoff::future::retry_notify;
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff};

/// Errors that distinguish failures worth retrying from those that aren't
pub trait RetryableError: std::error::Error + Send + Sync + 'static {
    fn is_transient(&self) -> bool;
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
) -> ExponentialBackoff {
    let current_interval = initial_interval;
    ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Policy for delaying the next pass after a pass fails transiently.  It
/// keeps growing across consecutive failures until reset.
pub fn error_backoff_policy(config: &ErrorBackoffConfig) -> ExponentialBackoff {
    policy_with_max(
        Duration::from_millis(config.initial_interval_ms),
        Duration::from_millis(config.max_interval_ms),
    )
}

/// Exponential backoff that gives up after a fixed number of attempts
#[derive(Clone, Debug)]
pub struct BoundedBackoff {
    inner: ExponentialBackoff,
    max_attempts: u32,
    attempts: u32,
}

impl BoundedBackoff {
    pub fn new(config: &RetryConfig) -> BoundedBackoff {
        BoundedBackoff {
            inner: policy_with_max(
                Duration::from_millis(config.initial_interval_ms),
                Duration::from_millis(config.max_interval_ms),
            ),
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }
}

impl Backoff for BoundedBackoff {
    // Called once per failed attempt.
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.inner.reset();
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts the attempts
/// allowed by `config`.  The last error is returned in the latter two cases.
pub(crate) async fn retry_transient<T, E, F, Fut>(
    log: &Logger,
    config: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_notify(
        BoundedBackoff::new(config),
        || {
            let attempt = op();
            async move {
                attempt.await.map_err(|err| {
                    if err.is_transient() {
                        BackoffError::transient(err)
                    } else {
                        BackoffError::permanent(err)
                    }
                })
            }
        },
        |err: E, delay: Duration| {
            warn!(
                log,
                "failed to {what}, will retry";
                "delay" => ?delay,
                "error" => InlineErrorChain::new(&err),
            );
        },
    )
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use workercluster_authz_test_utils::dev::test_setup_log;

    #[derive(Debug, thiserror::Error)]
    #[error("flaky: transient={0}")]
    struct Flaky(bool);

    impl RetryableError for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig { initial_interval_ms: 1, max_interval_ms: 2, max_attempts }
    }

    #[test]
    fn bounded_backoff_counts_attempts() {
        let mut backoff = BoundedBackoff::new(&fast(3));
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert!(backoff.next_backoff().is_some());

        let mut once = BoundedBackoff::new(&fast(1));
        assert_eq!(once.next_backoff(), None);
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let logctx = test_setup_log("retry_stops_after_max_attempts");
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> =
            retry_transient(&logctx.log, &fast(4), "do the thing", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(true))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_error() {
        let logctx = test_setup_log("retry_gives_up_on_permanent_error");
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> =
            retry_transient(&logctx.log, &fast(4), "do the thing", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(false))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn retry_returns_eventual_success() {
        let logctx = test_setup_log("retry_returns_eventual_success");
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> =
            retry_transient(&logctx.log, &fast(4), "do the thing", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Flaky(true))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        logctx.cleanup_successful();
    }
}
