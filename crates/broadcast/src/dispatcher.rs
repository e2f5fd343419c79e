//! Batched, retrying fan-out.
//!
//! Items are split into chunks of `batch_size`. Chunks run one after another
//! with `batch_delay` between them; the items of a chunk are sent
//! concurrently. Each item gets up to `max_retries` attempts with a linear
//! backoff of `attempt × retry_base` after each failed attempt.

use std::{future::Future, time::Duration};

use {
    futures::future::join_all,
    herald_common::{BatchConfig, DispatchResult},
    tracing::{debug, info, warn},
};

/// Default base of the linear retry backoff.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Linear backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchDispatcher {
    retry: RetryPolicy,
}

impl BatchDispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Send to every id with `send`, never failing as a whole. The result
    /// always accounts for every item exactly once.
    pub async fn dispatch<F, Fut>(
        &self,
        label: &str,
        items: &[String],
        config: BatchConfig,
        send: F,
    ) -> DispatchResult
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut result = DispatchResult::default();
        if items.is_empty() {
            debug!(label, "nothing to dispatch");
            return result;
        }

        let batch_size = config.batch_size.max(1);
        let batches = items.len().div_ceil(batch_size);
        info!(
            label,
            items = items.len(),
            batches,
            batch_size,
            "dispatch started"
        );

        for (index, chunk) in items.chunks(batch_size).enumerate() {
            debug!(
                label,
                batch = index + 1,
                of = batches,
                size = chunk.len(),
                "sending batch"
            );

            let outcomes = join_all(chunk.iter().map(|id| self.deliver(label, id, config, &send))).await;

            for (id, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => result.record_success(),
                    Err(error) => result.record_failure(id.as_str(), error),
                }
            }

            if index + 1 < batches && !config.batch_delay.is_zero() {
                tokio::time::sleep(config.batch_delay).await;
            }
        }

        info!(
            label,
            success = result.success_count,
            failed = result.failed_count,
            "dispatch finished"
        );
        result
    }

    async fn deliver<F, Fut>(
        &self,
        label: &str,
        id: &str,
        config: BatchConfig,
        send: &F,
    ) -> Result<(), String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let max_attempts = config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match send(id.to_string()).await {
                Ok(()) => {
                    debug!(label, id, attempt, "sent");
                    return Ok(());
                },
                Err(e) => {
                    last_error = e.to_string();
                    warn!(label, id, attempt, max_attempts, error = %last_error, "send failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                },
            }
        }

        Err(last_error)
    }
}
