// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-operation retry with exponential backoff.

use crate::config::RetryPolicy;
use crate::error::ClusterError;
use std::future::Future;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `op` until it succeeds, fails with a non-retryable error or runs out of attempts.
///
/// Cancellation stops waiting between attempts; the last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
