use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::bucket::TokenBucket;
use crate::clock::Clock;
use crate::error::{AdmissionError, StoreError};
use crate::store::BucketStore;

/// Deployment-wide admission constants. Rates are configured per minute and
/// applied per second so refill accrues continuously.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Policy {
    pub fn new(capacity: u32, refill_per_min: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_min as f64 / 60.0,
            max_retries: 5,
            backoff_base: Duration::from_millis(10),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }
}

/// Successful admission; exactly one token was spent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admitted {
    pub tokens_remaining: f64,
}

/// Per-subject token-bucket admission over a shared store. Holds no bucket
/// state of its own; the store record is the single source of truth and the
/// store and clock are injected, so any number of replicated workers can run
/// one of these against the same table.
pub struct RateLimiter<S, C> {
    store: S,
    clock: C,
    policy: Policy,
}

impl<S: BucketStore, C: Clock> RateLimiter<S, C> {
    pub fn new(store: S, clock: C, policy: Policy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Admit or reject one request for `subject_key`.
    ///
    /// Lazily creates the bucket on first sight, refills from elapsed time,
    /// then writes back conditionally. A conflicting concurrent consumer
    /// forces a fresh read and a retry, bounded by the policy's ceiling;
    /// denial never writes and is never retried.
    pub async fn consume(&self, subject_key: &str) -> Result<Admitted, AdmissionError> {
        let mut attempts = 0u32;
        loop {
            let now = self.clock.now();
            let observed = match self.read_or_seed(subject_key, now).await? {
                Some(bucket) => bucket,
                // the record vanished between losing the creation race and
                // re-reading (external cleanup); counts as a conflict
                None => {
                    attempts += 1;
                    if attempts >= self.policy.max_retries {
                        return Err(AdmissionError::ContentionExceeded { attempts });
                    }
                    self.backoff(attempts).await;
                    continue;
                }
            };

            let candidate =
                observed.refilled(now, self.policy.refill_per_sec, self.policy.capacity);
            if candidate < 1.0 {
                return Err(AdmissionError::RateLimitExceeded {
                    retry_after: self.retry_after(candidate),
                });
            }

            // a worker with a lagging clock must not move last_refill backward
            let stamp = now.max(observed.last_refill);
            let applied = self
                .store
                .update_if_unchanged(&observed, candidate - 1.0, stamp)
                .await?;
            if applied {
                return Ok(Admitted {
                    tokens_remaining: candidate - 1.0,
                });
            }

            attempts += 1;
            if attempts >= self.policy.max_retries {
                return Err(AdmissionError::ContentionExceeded { attempts });
            }
            debug!(subject_key, attempts, "bucket write conflicted, retrying");
            self.backoff(attempts).await;
        }
    }

    /// Read the bucket, seeding a full one on first sight. A loser of the
    /// creation race adopts the winner's record, never its own intended
    /// state.
    async fn read_or_seed(
        &self,
        subject_key: &str,
        now: i64,
    ) -> Result<Option<TokenBucket>, StoreError> {
        if let Some(bucket) = self.store.get(subject_key).await? {
            return Ok(Some(bucket));
        }
        let fresh = TokenBucket::full(subject_key, self.policy.capacity, now);
        if self.store.create_if_absent(&fresh).await? {
            return Ok(Some(fresh));
        }
        self.store.get(subject_key).await
    }

    /// Whole seconds until one token will have accrued, at least 1.
    fn retry_after(&self, candidate: f64) -> Duration {
        let deficit = 1.0 - candidate;
        let secs = (deficit / self.policy.refill_per_sec).ceil().max(1.0);
        Duration::from_secs(secs as u64)
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.policy.backoff_base * attempt;
        let jitter_ms = self.policy.backoff_base.as_millis().max(1) as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms));
        sleep(base + jitter).await;
    }
}
