//! Per-call timeouts and bounded retries for oracle requests.

use std::future::Future;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::{OracleError, OracleResult};
use crate::traits::oracle::{ClassifyItem, ClassifyLabel, DedupDecision, Oracle};
use crate::types::cluster::ItemKind;
use crate::types::config::RetryPolicy;

/// Run `op` under the policy's per-attempt deadline, retrying retryable
/// failures with linearly increasing backoff.
///
/// `input_chars` scales the deadline. Non-retryable errors are returned as-is;
/// running out of attempts yields [`OracleError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    input_chars: usize,
    mut op: F,
) -> OracleResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OracleResult<T>>,
{
    let deadline = policy.timeout_for(input_chars);
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(deadline, op()).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(deadline)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Oracle call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                error!(error = %e, attempts = attempt, "Oracle call failed after all retries");
                return Err(OracleError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// An [`Oracle`] decorator that applies a [`RetryPolicy`] to every call.
pub struct Retrying<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: Oracle> Retrying<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<O: Oracle> Oracle for Retrying<O> {
    async fn classify(&self, batch: &[ClassifyItem]) -> OracleResult<Vec<ClassifyLabel>> {
        let chars = batch.iter().map(|item| item.text.chars().count()).sum();
        with_retry(&self.policy, chars, || self.inner.classify(batch)).await
    }

    async fn judge(
        &self,
        seed: &str,
        candidates: &[String],
        kind: ItemKind,
    ) -> OracleResult<DedupDecision> {
        let chars = seed.chars().count()
            + candidates.iter().map(|c| c.chars().count()).sum::<usize>();
        with_retry(&self.policy, chars, || self.inner.judge(seed, candidates, kind)).await
    }
}
