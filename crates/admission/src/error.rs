use std::time::Duration;

/// Failure reaching or querying the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unreachable: {0}")]
    Unreachable(String),
}

/// Every consume outcome other than admission. Nothing is swallowed
/// unclassified: denial is final for the call, contention is reported only
/// after the retry ceiling, store failures surface immediately.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The subject has no whole token left. No write was performed.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// Conditional writes kept losing to concurrent consumers past the
    /// retry ceiling. Transient; the caller may retry the whole request.
    #[error("bucket contention persisted after {attempts} attempts")]
    ContentionExceeded { attempts: u32 },

    /// The backing store failed. Never retried here.
    #[error("bucket store unavailable")]
    StoreUnavailable(#[from] StoreError),
}
