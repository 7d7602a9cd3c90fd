//! Fixed-backoff retry for node requests.
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use log::warn;

use crate::node::NodeError;

/// How to handle node errors. Walks configured without a policy stop on the first error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between attempts.
    pub backoff: Duration,
    /// Total attempts including the first. `None` retries until success.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

/// Longest uninterrupted sleep while waiting on a shutdown flag.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Sleeps for the duration unless the shutdown flag is set first.
///
/// Returns false if the sleep was cut short by the flag.
pub async fn pause(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(SHUTDOWN_CHECK_INTERVAL)).await;
    }
}

/// Runs the operation, retrying transient errors according to the policy.
///
/// No further attempt is made once the shutdown flag is set; the last error
/// is returned instead. Returns the result and the number of retries performed.
pub async fn with_retry<T, F, Fut>(
    policy: Option<&RetryPolicy>,
    shutdown: &AtomicBool,
    mut operation: F,
) -> (Result<T, NodeError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return (Ok(value), attempts - 1),
            Err(e) => e,
        };
        let Some(policy) = policy else {
            return (Err(error), attempts - 1);
        };
        if !error.is_transient() || !policy.allows_another(attempts) {
            return (Err(error), attempts - 1);
        }
        warn!(
            "Attempt {attempts} failed ({error}), retrying in {}s",
            policy.backoff.as_secs_f32()
        );
        if !pause(policy.backoff, shutdown).await {
            return (Err(error), attempts - 1);
        }
    }
}
