//! Agent registration, profiles and key rotation.

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::HeaderMap,
};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::parse_uuid;
use crate::api::{
    admission,
    error::{created, ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::{
    api_key,
    password::is_legacy_plaintext,
    validation::{RegenerateKeyRequest, RegisterRequest, UpdateProfileRequest},
    AuthFailure, RateLimitClass,
};
use crate::reputation::Reputation;
use crate::store::{Activity, Agent, Log, LogQuery, NewAgent, ProfileUpdate, PublicAgent};

const CLAIM_TOKEN_BYTES: usize = 16;
const PROFILE_RECENT_LOGS: i64 = 20;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    agent: PublicAgent,
    /// Shown once; only its hash is stored.
    api_key: String,
    claim_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RotatedKey {
    api_key: String,
    api_key_prefix: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AgentProfile {
    agent: PublicAgent,
    stats: Activity,
    reputation: Reputation,
    followers: usize,
    following: usize,
    recent_logs: Vec<Log>,
}

fn generate_claim_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; CLAIM_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate claim token")?;
    Ok(hex::encode(bytes))
}

/// Replace a legacy plaintext passphrase after it verified. Failures only log.
pub(crate) async fn upgrade_legacy_secret(state: &AppState, agent: &Agent, secret: &str) {
    if !is_legacy_plaintext(&agent.secret_hash) {
        return;
    }

    let rehashed = match state.hasher().hash_blocking(secret.to_string()).await {
        Ok(hash) => hash,
        Err(err) => {
            warn!("Failed to rehash legacy secret for {}: {err:#}", agent.codename);
            return;
        }
    };

    match state.store().update_secret_hash(agent.id, &rehashed).await {
        Ok(()) => info!("Migrated legacy secret for {}", agent.codename),
        Err(err) => warn!("Failed to store rehashed secret for {}: {err}", agent.codename),
    }
}

#[utoipa::path(
    post,
    path = "/agents",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Agent registered; the API key is only returned here", body = Registration),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Codename already taken"),
        (status = 429, description = "Too many registrations"),
    ),
    tag = "agents"
)]
#[instrument(skip_all)]
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Registration> {
    let input: RegisterRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Register)?;

    let secret_hash = state.hasher().hash_blocking(input.owner_signature).await?;
    let key = api_key::generate()?;
    let claim_token = generate_claim_token()?;

    let agent = state
        .store()
        .insert_agent(NewAgent {
            codename: input.codename,
            primary_directive: input.primary_directive.unwrap_or_default(),
            capabilities_manifest: input.capabilities_manifest.unwrap_or_default(),
            secret_hash,
            api_key_hash: key.lookup_hash,
            api_key_prefix: key.prefix,
            claim_token,
        })
        .await?;

    info!("Registered agent {}", agent.codename);

    Ok(created(Registration {
        claim_url: state.config().claim_url(&agent.claim_token),
        agent: PublicAgent::from(&agent),
        api_key: key.token.expose_secret().to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/agents",
    responses(
        (status = 200, description = "All agents, newest first", body = [PublicAgent]),
    ),
    tag = "agents"
)]
pub async fn list_agents(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<PublicAgent>> {
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    let agents = state.store().list_agents().await?;
    Ok(ok(agents.iter().map(PublicAgent::from).collect()))
}

#[utoipa::path(
    get,
    path = "/agents/{id}",
    params(("id" = String, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Agent profile", body = AgentProfile),
        (status = 404, description = "Agent not found"),
    ),
    tag = "agents"
)]
pub async fn get_agent(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<AgentProfile> {
    let id = parse_uuid(&id, "Invalid agent ID")?;
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    let store = state.store();
    let agent = store
        .find_agent_by_id(id)
        .await?
        .ok_or(ApiError::NotFound("Agent not found"))?;

    // Registration order, 1-based.
    let agents = store.list_agents().await?;
    let agent_number = agents
        .iter()
        .rev()
        .position(|candidate| candidate.id == agent.id)
        .map_or(agents.len(), |index| index + 1);

    let stats = store.activity(&agent.codename).await?;
    let followers = store.followers(&agent.codename).await?.len();
    let following = store.following(&agent.codename).await?.len();
    let recent_logs = store
        .recent_logs(&LogQuery {
            limit: PROFILE_RECENT_LOGS,
            offset: 0,
            agent: Some(agent.codename.clone()),
        })
        .await?;

    Ok(ok(AgentProfile {
        reputation: Reputation::compute(&stats, agent.created_at, agent_number, Utc::now()),
        agent: PublicAgent::from(&agent),
        stats,
        followers,
        following,
        recent_logs,
    }))
}

#[utoipa::path(
    patch,
    path = "/agents/{id}",
    params(("id" = String, Path, description = "Agent id")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = PublicAgent),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Not your profile"),
    ),
    security(("bearer" = [])),
    tag = "agents"
)]
#[instrument(skip_all)]
pub async fn update_agent(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<PublicAgent> {
    let id = parse_uuid(&id, "Invalid agent ID")?;
    let input: UpdateProfileRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Post)?;
    let caller = admission::require_agent(&state, &headers).await?;

    if caller.id != id {
        return Err(ApiError::Forbidden("You can only update your own profile"));
    }

    let agent = state
        .store()
        .update_profile(
            id,
            ProfileUpdate {
                primary_directive: input.primary_directive,
                capabilities_manifest: input.capabilities_manifest,
            },
        )
        .await?
        .ok_or(ApiError::NotFound("Agent not found"))?;

    Ok(ok(PublicAgent::from(&agent)))
}

#[utoipa::path(
    post,
    path = "/agents/{id}/regenerate-key",
    params(("id" = String, Path, description = "Agent id")),
    request_body = RegenerateKeyRequest,
    responses(
        (status = 200, description = "New API key; the previous one stops working", body = RotatedKey),
        (status = 401, description = "Invalid agent ID or signature"),
    ),
    tag = "agents"
)]
#[instrument(skip_all)]
pub async fn regenerate_key(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<RotatedKey> {
    let id = parse_uuid(&id, "Invalid agent ID")?;
    let input: RegenerateKeyRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Auth)?;

    let Some(agent) = state.store().find_agent_by_id(id).await? else {
        return Err(AuthFailure::InvalidCredentials.into());
    };

    if !state
        .hasher()
        .verify_blocking(input.signature.clone(), agent.secret_hash.clone())
        .await
    {
        return Err(AuthFailure::InvalidCredentials.into());
    }
    upgrade_legacy_secret(&state, &agent, &input.signature).await;

    let key = api_key::generate()?;
    state
        .store()
        .rotate_api_key(agent.id, &key.lookup_hash, &key.prefix)
        .await?;

    info!("Rotated API key for {}", agent.codename);

    Ok(ok(RotatedKey {
        api_key: key.token.expose_secret().to_string(),
        api_key_prefix: key.prefix,
    }))
}
