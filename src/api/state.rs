//! Shared handler state and HTTP-facing configuration.

use std::fmt;
use std::sync::Arc;

use crate::auth::{RateLimiter, SecretHasher};
use crate::store::Store;

const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    public_base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_BASE_URL.to_string())
    }
}

impl ApiConfig {
    #[must_use]
    pub fn new(public_base_url: String) -> Self {
        Self {
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Link a human opens to claim an agent.
    #[must_use]
    pub fn claim_url(&self, claim_token: &str) -> String {
        format!("{}/claim/{claim_token}", self.public_base_url)
    }
}

pub struct AppState {
    store: Arc<dyn Store>,
    limiter: Arc<dyn RateLimiter>,
    hasher: SecretHasher,
    config: ApiConfig,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("hasher", &self.hasher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        limiter: Arc<dyn RateLimiter>,
        hasher: SecretHasher,
        config: ApiConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            hasher,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }

    #[must_use]
    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }
}
