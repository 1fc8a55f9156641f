//! API key generation and bearer-token verification.
//!
//! Keys are `sk_agent_` followed by 64 hex characters (32 bytes from the OS
//! RNG). Only the SHA-256 of the full key is stored; the key itself is returned
//! to the caller once and never persisted.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::AuthFailure;
use crate::store::{Agent, Store, StoreError};

pub const API_KEY_NAMESPACE: &str = "sk_agent_";
/// Leading characters of a key that are safe to show in the UI.
pub const API_KEY_PREFIX_LEN: usize = 20;
const API_KEY_RANDOM_BYTES: usize = 32;

const MALFORMED_SCHEME: &str = "Invalid authorization format. Use: Bearer <api_key>";
const MALFORMED_KEY: &str = "Invalid API key format";

#[derive(Debug)]
pub struct GeneratedKey {
    pub token: SecretString,
    pub prefix: String,
    pub lookup_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Rejected(#[from] AuthFailure),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Create a new API key with its display prefix and lookup hash.
///
/// # Errors
/// Returns an error if the OS random number generator fails.
pub fn generate() -> Result<GeneratedKey> {
    let mut bytes = [0u8; API_KEY_RANDOM_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate API key")?;

    let token = format!("{API_KEY_NAMESPACE}{}", hex::encode(bytes));
    let prefix = token[..API_KEY_PREFIX_LEN].to_string();
    let lookup_hash = lookup_hash(&token);

    Ok(GeneratedKey {
        token: SecretString::from(token),
        prefix,
        lookup_hash,
    })
}

/// Hash a key so raw values never touch the store.
#[must_use]
pub fn lookup_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extract the key from an `Authorization` header value.
///
/// # Errors
/// Returns `MalformedAuth` if the scheme is not `Bearer` or the key lacks the
/// `sk_agent_` namespace.
pub fn parse_bearer(header: &str) -> Result<&str, AuthFailure> {
    let (scheme, token) = header
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(AuthFailure::MalformedAuth(MALFORMED_SCHEME))?;

    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthFailure::MalformedAuth(MALFORMED_SCHEME));
    }

    if !token.starts_with(API_KEY_NAMESPACE) {
        return Err(AuthFailure::MalformedAuth(MALFORMED_KEY));
    }

    Ok(token)
}

/// Resolve an `Authorization` header to the agent that owns the key.
///
/// # Errors
/// Returns `VerifyError::Rejected` for missing, malformed or unknown keys and
/// `VerifyError::Store` if the lookup itself fails.
#[instrument(skip_all)]
pub async fn verify(store: &dyn Store, header: Option<&str>) -> Result<Agent, VerifyError> {
    let header = header.ok_or(AuthFailure::MissingAuth)?;
    let token = parse_bearer(header)?;

    match store.find_agent_by_key_hash(&lookup_hash(token)).await? {
        Some(agent) => Ok(agent),
        None => {
            debug!("API key did not match any agent");
            Err(AuthFailure::InvalidKey.into())
        }
    }
}
