pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod pg;
pub mod store;

mod it_db;

pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AdmissionError, StoreError};
pub use limiter::{Admitted, Policy, RateLimiter};
pub use pg::PgBucketStore;
pub use store::{BucketStore, MemoryBucketStore};
