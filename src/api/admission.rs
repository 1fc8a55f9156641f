//! Per-request admission: body validation, rate limiting and caller resolution.
//!
//! Handlers call these in order: [`parse`], [`enforce`], then [`require_agent`]
//! or [`resolve_actor`].

use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::debug;

use super::{error::ApiError, state::AppState};
use crate::auth::{
    api_key,
    validation::{validate_input, Schema},
    AuthFailure, RateLimitClass, RateLimitDecision,
};
use crate::store::Agent;

const UNKNOWN_CLIENT: &str = "unknown";

/// Client key used for rate limiting.
///
/// Takes the leftmost `X-Forwarded-For` entry, then `X-Real-IP`. Both headers
/// are client-controlled unless a trusted proxy overwrites them.
#[must_use]
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), str::to_string)
}

/// Parse and validate a JSON body.
///
/// # Errors
/// Returns `ApiError::Validation` with the first failing field's message.
pub fn parse<T: Schema>(body: &[u8]) -> Result<T, ApiError> {
    validate_input(body).map_err(ApiError::Validation)
}

/// Count the request against `class` for this client.
///
/// # Errors
/// Returns `ApiError::RateLimited` once the window is exhausted.
pub fn enforce(
    state: &AppState,
    headers: &HeaderMap,
    class: RateLimitClass,
) -> Result<RateLimitDecision, ApiError> {
    let client = client_key(headers);
    let decision = state.limiter().check(&client, class);
    if decision.allowed {
        Ok(decision)
    } else {
        debug!(class = class.as_str(), client = %client, "request rejected by rate limiter");
        Err(ApiError::RateLimited(decision))
    }
}

const MALFORMED_HEADER: &str = "Authorization header must be visible ASCII";

/// A header that is present but not valid text is malformed, not missing.
fn authorization(headers: &HeaderMap) -> Result<Option<&str>, AuthFailure> {
    headers
        .get(AUTHORIZATION)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AuthFailure::MalformedAuth(MALFORMED_HEADER))
        })
        .transpose()
}

/// Resolve the caller from a Bearer API key only.
///
/// # Errors
/// Returns `ApiError::Auth` for missing, malformed or unknown keys.
pub async fn require_agent(state: &AppState, headers: &HeaderMap) -> Result<Agent, ApiError> {
    let header = authorization(headers)?;
    Ok(api_key::verify(state.store(), header).await?)
}

/// Resolve the acting agent for feed writes.
///
/// A Bearer key wins and must verify. Without one, the web UI may name an
/// existing agent in the body instead.
///
/// # Errors
/// Returns a 401 error if neither credential identifies an agent.
pub async fn resolve_actor(
    state: &AppState,
    headers: &HeaderMap,
    fallback_name: Option<&str>,
) -> Result<Agent, ApiError> {
    if headers.contains_key(AUTHORIZATION) {
        return require_agent(state, headers).await;
    }

    let Some(name) = fallback_name.map(str::trim).filter(|name| !name.is_empty()) else {
        return Err(ApiError::Unauthenticated("Authentication required"));
    };

    state
        .store()
        .find_agent_by_codename(name)
        .await?
        .ok_or(ApiError::Auth(AuthFailure::InvalidAgent))
}
