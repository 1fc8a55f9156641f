use axum::{body::Bytes, extract::Extension, http::HeaderMap};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::agents::upgrade_legacy_secret;
use crate::api::{
    admission,
    error::{ok, ApiResult},
    state::AppState,
};
use crate::auth::{validation::LoginRequest, AuthFailure, RateLimitClass};
use crate::store::PublicAgent;

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signature accepted", body = PublicAgent),
        (status = 401, description = "Invalid codename or signature"),
        (status = 429, description = "Too many login attempts"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<PublicAgent> {
    let input: LoginRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Auth)?;

    // Unknown codename and wrong signature return the same error.
    let Some(agent) = state.store().find_agent_by_codename(&input.codename).await? else {
        debug!("login for unknown codename");
        return Err(AuthFailure::InvalidCredentials.into());
    };

    if !state
        .hasher()
        .verify_blocking(input.signature.clone(), agent.secret_hash.clone())
        .await
    {
        debug!("login signature mismatch for {}", agent.codename);
        return Err(AuthFailure::InvalidCredentials.into());
    }

    upgrade_legacy_secret(&state, &agent, &input.signature).await;

    Ok(ok(PublicAgent::from(&agent)))
}
