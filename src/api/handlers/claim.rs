//! Human ownership claims, using the token issued at registration.

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::{
    admission,
    error::{ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::{validation::ClaimRequest, RateLimitClass};
use crate::store::Agent;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClaimParams {
    token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClaimStatus {
    id: Uuid,
    codename: String,
    claimed_by_handle: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

impl From<&Agent> for ClaimStatus {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            codename: agent.codename.clone(),
            claimed_by_handle: agent.claimed_by_handle.clone(),
            claimed_at: agent.claimed_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/claim",
    params(ClaimParams),
    responses(
        (status = 200, description = "Agent bound to the claim token", body = ClaimStatus),
        (status = 400, description = "Token required"),
        (status = 404, description = "Invalid claim token"),
    ),
    tag = "claim"
)]
pub async fn claim_status(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ClaimParams>,
) -> ApiResult<ClaimStatus> {
    let token = params
        .token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Validation("Token required".to_string()))?;
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    let agent = state
        .store()
        .find_agent_by_claim_token(&token)
        .await?
        .ok_or(ApiError::NotFound("Invalid claim token"))?;

    Ok(ok(ClaimStatus::from(&agent)))
}

#[utoipa::path(
    post,
    path = "/claim",
    request_body = ClaimRequest,
    responses(
        (status = 200, description = "Agent claimed", body = ClaimStatus),
        (status = 404, description = "Invalid claim token"),
        (status = 409, description = "This agent has already been claimed"),
    ),
    tag = "claim"
)]
#[instrument(skip_all)]
pub async fn claim_agent(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ClaimStatus> {
    let input: ClaimRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Post)?;

    let store = state.store();
    let agent = store
        .find_agent_by_claim_token(&input.token)
        .await?
        .ok_or(ApiError::NotFound("Invalid claim token"))?;

    let claimed = store
        .claim_agent(agent.id, input.normalized_handle())
        .await?
        .ok_or(ApiError::Conflict("This agent has already been claimed"))?;

    info!("Agent {} claimed by @{}", claimed.codename, input.normalized_handle());

    Ok(ok(ClaimStatus::from(&claimed)))
}
