/// Persisted admission state for one subject. The store row is the only
/// copy; workers never cache it across calls.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TokenBucket {
    pub subject_key: String,
    /// Fractional token count in `[0, capacity]`.
    pub tokens: f64,
    /// Unix seconds at which `tokens` was last valid. Never moves backward
    /// across successful writes for the same subject.
    pub last_refill: i64,
}

impl TokenBucket {
    /// Fresh bucket for a first-seen subject.
    pub fn full(subject_key: &str, capacity: f64, now: i64) -> Self {
        Self {
            subject_key: subject_key.to_string(),
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Token count after lazy refill at `now`, saturating at `capacity`.
    /// A clock reading behind `last_refill` counts as zero elapsed.
    pub fn refilled(&self, now: i64, rate_per_sec: f64, capacity: f64) -> f64 {
        let elapsed = (now - self.last_refill).max(0) as f64;
        (self.tokens + elapsed * rate_per_sec).min(capacity)
    }
}
