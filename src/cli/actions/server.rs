use crate::{
    api::{self, state::{ApiConfig, AppState}},
    auth::{FixedWindowLimiter, HashPolicy, NoopRateLimiter, RateLimiter, RateLimits, SecretHasher},
    store::{MemoryStore, PgStore, Store},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub config: ApiConfig,
    /// `None` disables rate limiting.
    pub limits: Option<RateLimits>,
    pub hash_policy: HashPolicy,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store or hasher cannot be set up, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let store: Arc<dyn Store> = match &args.dsn {
        Some(dsn) => Arc::new(PgStore::connect(dsn).await?),
        None => {
            warn!("No --dsn given, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let limiter: Arc<dyn RateLimiter> = match args.limits {
        Some(limits) => Arc::new(FixedWindowLimiter::new(limits)),
        None => {
            warn!("Rate limiting is disabled");
            Arc::new(NoopRateLimiter)
        }
    };

    if args.hash_policy.legacy_plaintext() {
        info!("Legacy plaintext passphrases are accepted and rehashed on login");
    }
    let hasher = SecretHasher::new(args.hash_policy)?;

    let state = Arc::new(AppState::new(store, limiter, hasher, args.config));

    let result = api::serve(args.port, state).await;
    crate::cli::telemetry::shutdown_tracer();
    result
}
