use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use admission::clock::SystemClock;
use admission::config::Config;
use admission::error::AdmissionError;
use admission::limiter::RateLimiter;
use admission::pg::PgBucketStore;
use admission::store::BucketStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("check") => {
            let subject = args.next().context("usage: admission check <subject>")?;
            check(&subject).await
        }
        Some("prune") => prune().await,
        _ => {
            eprintln!("usage: admission <check <subject> | prune>");
            std::process::exit(64)
        }
    }
}

fn init_tracing() {
    let env = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("info".parse().unwrap_or_default());
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .compact()
        .init();
}

/// One consume decision as a machine-readable line.
#[derive(Debug, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
enum Outcome {
    Admitted {
        subject: String,
        tokens_remaining: f64,
    },
    Denied {
        subject: String,
        retry_after_secs: u64,
    },
    Unavailable {
        subject: String,
        reason: String,
    },
}

/// Run a single admission check and fail closed: contention and store
/// failures both reject the request as temporarily unavailable.
async fn check(subject: &str) -> Result<()> {
    let cfg = Config::from_env()?;
    let pool = connect(&cfg).await?;
    let limiter = RateLimiter::new(PgBucketStore::new(pool), SystemClock, cfg.policy());

    let (outcome, code) = match limiter.consume(subject).await {
        Ok(admitted) => (
            Outcome::Admitted {
                subject: subject.to_string(),
                tokens_remaining: admitted.tokens_remaining,
            },
            0,
        ),
        Err(AdmissionError::RateLimitExceeded { retry_after }) => (
            Outcome::Denied {
                subject: subject.to_string(),
                retry_after_secs: retry_after.as_secs(),
            },
            2,
        ),
        Err(err) => {
            error!(subject, err = %err, "admission check unavailable");
            (
                Outcome::Unavailable {
                    subject: subject.to_string(),
                    reason: err.to_string(),
                },
                3,
            )
        }
    };

    println!("{}", serde_json::to_string(&outcome)?);
    std::process::exit(code);
}

/// External retention policy: drop buckets idle past the configured
/// horizon, in batches. The limiter itself never deletes records.
async fn prune() -> Result<()> {
    let cfg = Config::from_env()?;
    let pool = connect(&cfg).await?;
    let store = PgBucketStore::new(pool);

    let cutoff =
        (chrono::Utc::now() - chrono::Duration::days(cfg.retention_days as i64)).timestamp();
    let batch = 500;
    let mut total = 0u64;
    loop {
        let removed = store.prune_idle(cutoff, batch).await?;
        total += removed;
        if removed < batch as u64 {
            break;
        }
    }
    info!(total, retention_days = cfg.retention_days, "pruned idle buckets");
    Ok(())
}

async fn connect(cfg: &Config) -> Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await
        .context("connect postgres")?;
    sqlx::migrate!().run(&pool).await.context("run migrations")?;
    Ok(pool)
}
