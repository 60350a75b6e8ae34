//! Bounded-backoff retry wrapper for transient store failures.
//!
//! Retries happen at this layer so the pipeline never re-diffs on a blip;
//! exhausted retries surface to the caller as a per-unit error, never as a
//! silent drop.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::IndexError;

use super::{PointRecord, SearchFilter, SearchHit, VectorIndex};

/// How many attempts to make and how long to back off between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: usize,
    /// Delay before the first retry; doubles each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, retry: usize) -> Duration {
        let capped = retry.min(5) as u32;
        self.base_delay * (1 << capped)
    }
}

/// [`VectorIndex`] decorator that retries transient failures.
///
/// Only errors classified transient (see [`IndexError::is_transient`]) are
/// retried; permanent failures pass through immediately.
pub struct RetryingIndex<I> {
    inner: I,
    policy: RetryPolicy,
}

impl<I: VectorIndex> RetryingIndex<I> {
    /// Wraps a backend with the given policy.
    pub fn new(inner: I, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Access to the wrapped backend.
    pub fn inner(&self) -> &I {
        &self.inner
    }
}

/// Plain retry loop, once per trait method: the boxed futures produced by
/// the async trait stay trivially `Send` this way.
macro_rules! retry_loop {
    ($self:ident, $call:expr) => {{
        let attempts = $self.policy.attempts.max(1);
        let mut retry = 0usize;
        loop {
            match $call {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry + 1 < attempts => {
                    retry += 1;
                    tracing::warn!(error = %err, retry, "transient store failure, backing off");
                    tokio::time::sleep($self.policy.delay(retry)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }};
}

#[async_trait]
impl<I: VectorIndex> VectorIndex for RetryingIndex<I> {
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<usize, IndexError> {
        retry_loop!(self, self.inner.upsert(points.clone()).await)
    }

    async fn delete(&self, vector_id: Uuid) -> Result<bool, IndexError> {
        retry_loop!(self, self.inner.delete(vector_id).await)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        retry_loop!(self, self.inner.search(query, k, filter).await)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        retry_loop!(self, self.inner.count().await)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails transiently a configured number of times.
    #[derive(Default)]
    struct FlakyIndex {
        failures_remaining: AtomicUsize,
        calls: AtomicUsize,
        permanent: bool,
    }

    impl FlakyIndex {
        fn failing(times: usize) -> Self {
            Self {
                failures_remaining: AtomicUsize::new(times),
                ..Default::default()
            }
        }

        fn fail(&self) -> Result<(), IndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                if self.permanent {
                    return Err(IndexError::store_permanent("bad request"));
                }
                return Err(IndexError::store_transient("connection reset"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        async fn upsert(&self, points: Vec<PointRecord>) -> Result<usize, IndexError> {
            self.fail()?;
            Ok(points.len())
        }

        async fn delete(&self, _vector_id: Uuid) -> Result<bool, IndexError> {
            self.fail()?;
            Ok(true)
        }

        async fn search(
            &self,
            _query: &[f32],
            _k: usize,
            _filter: Option<&SearchFilter>,
        ) -> Result<Vec<SearchHit>, IndexError> {
            self.fail()?;
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize, IndexError> {
            self.fail()?;
            Ok(0)
        }
    }

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let index = RetryingIndex::new(FlakyIndex::failing(2), fast_policy(3));
        let written = index
            .upsert(vec![PointRecord::new(Uuid::from_u128(1), vec![1.0], "x")])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(index.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let index = RetryingIndex::new(FlakyIndex::failing(10), fast_policy(3));
        let err = index.count().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(index.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_pass_through() {
        let mut flaky = FlakyIndex::failing(5);
        flaky.permanent = true;
        let index = RetryingIndex::new(flaky, fast_policy(4));
        let err = index.delete(Uuid::from_u128(7)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(index.inner().calls.load(Ordering::SeqCst), 1);
    }
}
