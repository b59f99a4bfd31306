use async_trait::async_trait;
use sqlx::PgPool;

use crate::bucket::TokenBucket;
use crate::error::StoreError;
use crate::store::BucketStore;

/// Bucket storage on shared Postgres. Conditional writes are plain
/// single-statement `insert ... on conflict do nothing` and guarded
/// `update`, checked through `rows_affected`, so replicated workers can
/// race on the same row without locks or transactions.
#[derive(Debug, Clone)]
pub struct PgBucketStore {
    pool: PgPool,
}

impl PgBucketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BucketStore for PgBucketStore {
    async fn get(&self, subject_key: &str) -> Result<Option<TokenBucket>, StoreError> {
        let row = sqlx::query_as::<_, TokenBucket>(
            r#"select subject_key, tokens, last_refill
               from rate_buckets where subject_key = $1"#,
        )
        .bind(subject_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_if_absent(&self, bucket: &TokenBucket) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"insert into rate_buckets(subject_key, tokens, last_refill)
               values($1,$2,$3)
               on conflict(subject_key) do nothing"#,
        )
        .bind(&bucket.subject_key)
        .bind(bucket.tokens)
        .bind(bucket.last_refill)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_if_unchanged(
        &self,
        expected: &TokenBucket,
        new_tokens: f64,
        new_last_refill: i64,
    ) -> Result<bool, StoreError> {
        // float8 round-trips the exact bits we read, so equality on `tokens`
        // matches precisely the version this caller observed
        let res = sqlx::query(
            r#"update rate_buckets
                  set tokens = $2, last_refill = $3
                where subject_key = $1 and tokens = $4 and last_refill = $5"#,
        )
        .bind(&expected.subject_key)
        .bind(new_tokens)
        .bind(new_last_refill)
        .bind(expected.tokens)
        .bind(expected.last_refill)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn prune_idle(&self, cutoff: i64, batch_limit: i64) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"with doomed as (
                    select subject_key from rate_buckets
                    where last_refill < $1
                    order by last_refill asc
                    limit $2
                )
                delete from rate_buckets b using doomed d
                where b.subject_key = d.subject_key"#,
        )
        .bind(cutoff)
        .bind(batch_limit)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
