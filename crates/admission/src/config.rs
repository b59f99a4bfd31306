use anyhow::{Context, Result};

use crate::limiter::Policy;

/// Deployment-wide settings, read from the environment. Capacity and refill
/// rate are per deployment, never per subject.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bucket_capacity: u32,
    pub refill_per_min: u32,
    pub max_retries: u32,
    pub retention_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let bucket_capacity = std::env::var("ADMIT_BUCKET_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let refill_per_min = std::env::var("ADMIT_REFILL_PER_MIN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let max_retries = std::env::var("ADMIT_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let retention_days = std::env::var("ADMIT_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        Ok(Self {
            database_url,
            bucket_capacity,
            refill_per_min,
            max_retries,
            retention_days,
        })
    }

    pub fn policy(&self) -> Policy {
        Policy::new(self.bucket_capacity, self.refill_per_min).with_max_retries(self.max_retries)
    }
}
