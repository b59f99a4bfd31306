use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bucket::TokenBucket;
use crate::error::StoreError;

/// Shared bucket storage. Every mutation is conditional on the record the
/// caller last observed, which keeps read-modify-write cycles safe across
/// any number of stateless workers without a lock anywhere.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn get(&self, subject_key: &str) -> Result<Option<TokenBucket>, StoreError>;

    /// Insert `bucket` only if no record exists for its subject. Returns
    /// false when a concurrent creator won; nothing is written then.
    async fn create_if_absent(&self, bucket: &TokenBucket) -> Result<bool, StoreError>;

    /// Write the new state only if the stored record still matches
    /// `expected` exactly; false on conflict, record untouched. The guard
    /// covers both `tokens` and `last_refill`: with second-granularity
    /// timestamps, `last_refill` alone cannot tell two writes within the
    /// same second apart.
    async fn update_if_unchanged(
        &self,
        expected: &TokenBucket,
        new_tokens: f64,
        new_last_refill: i64,
    ) -> Result<bool, StoreError>;

    /// Retention sweep: delete buckets idle since before `cutoff`, at most
    /// `batch_limit` at a time. Never called by the consume path.
    async fn prune_idle(&self, cutoff: i64, batch_limit: i64) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S: BucketStore + ?Sized> BucketStore for Arc<S> {
    async fn get(&self, subject_key: &str) -> Result<Option<TokenBucket>, StoreError> {
        (**self).get(subject_key).await
    }

    async fn create_if_absent(&self, bucket: &TokenBucket) -> Result<bool, StoreError> {
        (**self).create_if_absent(bucket).await
    }

    async fn update_if_unchanged(
        &self,
        expected: &TokenBucket,
        new_tokens: f64,
        new_last_refill: i64,
    ) -> Result<bool, StoreError> {
        (**self)
            .update_if_unchanged(expected, new_tokens, new_last_refill)
            .await
    }

    async fn prune_idle(&self, cutoff: i64, batch_limit: i64) -> Result<u64, StoreError> {
        (**self).prune_idle(cutoff, batch_limit).await
    }
}

/// In-process store with the same conditional semantics as Postgres.
/// Backs the unit tests; also usable as-is for a single-worker deployment.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl MemoryBucketStore {
    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn get(&self, subject_key: &str) -> Result<Option<TokenBucket>, StoreError> {
        Ok(self.buckets.lock().unwrap().get(subject_key).cloned())
    }

    async fn create_if_absent(&self, bucket: &TokenBucket) -> Result<bool, StoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(&bucket.subject_key) {
            return Ok(false);
        }
        buckets.insert(bucket.subject_key.clone(), bucket.clone());
        Ok(true)
    }

    async fn update_if_unchanged(
        &self,
        expected: &TokenBucket,
        new_tokens: f64,
        new_last_refill: i64,
    ) -> Result<bool, StoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.get_mut(&expected.subject_key) {
            // exact f64 equality is intended: we compare against the very
            // value this caller read out of the map
            Some(stored)
                if stored.tokens == expected.tokens
                    && stored.last_refill == expected.last_refill =>
            {
                stored.tokens = new_tokens;
                stored.last_refill = new_last_refill;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune_idle(&self, cutoff: i64, batch_limit: i64) -> Result<u64, StoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        let doomed: Vec<String> = buckets
            .values()
            .filter(|b| b.last_refill < cutoff)
            .take(batch_limit as usize)
            .map(|b| b.subject_key.clone())
            .collect();
        for key in &doomed {
            buckets.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}
