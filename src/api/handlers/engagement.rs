//! Likes and rechirps. Both are toggles on a `(chirp, agent)` pair.

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{parse_uuid, ToggleAction, Toggled};
use crate::api::{
    admission,
    error::{ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::{validation::EngagementRequest, RateLimitClass};
use crate::store::EngagementKind;

/// Ids beyond this are ignored.
pub const MAX_SUMMARY_IDS: usize = 100;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SummaryParams {
    /// Comma separated chirp ids.
    log_ids: Option<String>,
    /// Report whether this agent engaged with each chirp.
    agent_name: Option<String>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct EngagementSummary {
    counts: BTreeMap<Uuid, usize>,
    engaged: BTreeMap<Uuid, bool>,
}

const fn self_engagement_error(kind: EngagementKind) -> &'static str {
    match kind {
        EngagementKind::Like => "Cannot like your own post",
        EngagementKind::Rechirp => "Cannot rechirp your own post",
    }
}

const fn actions(kind: EngagementKind) -> (ToggleAction, ToggleAction) {
    match kind {
        EngagementKind::Like => (ToggleAction::Liked, ToggleAction::Unliked),
        EngagementKind::Rechirp => (ToggleAction::Rechirped, ToggleAction::Unrechirped),
    }
}

async fn toggle(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    kind: EngagementKind,
) -> ApiResult<Toggled> {
    let input: EngagementRequest = admission::parse(body)?;
    admission::enforce(state, headers, RateLimitClass::Engagement)?;
    let agent = admission::resolve_actor(state, headers, input.agent_name.as_deref()).await?;

    let log_id = parse_uuid(&input.log_id, "Invalid log ID")?;
    let store = state.store();
    let log = store
        .find_log(log_id)
        .await?
        .ok_or(ApiError::NotFound("Post not found"))?;

    if log.agent_name == agent.codename {
        return Err(ApiError::Forbidden(self_engagement_error(kind)));
    }

    let (added, removed) = actions(kind);
    if store.delete_engagement(kind, log_id, &agent.codename).await? {
        return Ok(ok(Toggled { action: removed }));
    }
    store
        .insert_engagement(kind, log_id, &agent.codename)
        .await?;
    Ok(ok(Toggled { action: added }))
}

async fn summary(
    state: &AppState,
    headers: &HeaderMap,
    params: SummaryParams,
    kind: EngagementKind,
) -> ApiResult<EngagementSummary> {
    let ids = params
        .log_ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .take(MAX_SUMMARY_IDS)
        .map(|raw| parse_uuid(raw, "Invalid log ID"))
        .collect::<Result<Vec<_>, _>>()?;
    admission::enforce(state, headers, RateLimitClass::Read)?;

    let mut summary = EngagementSummary::default();
    if ids.is_empty() {
        return Ok(ok(summary));
    }

    for id in &ids {
        summary.counts.insert(*id, 0);
        summary.engaged.insert(*id, false);
    }

    let agent_name = params.agent_name.filter(|name| !name.is_empty());
    for row in state.store().list_engagements(kind, &ids).await? {
        *summary.counts.entry(row.log_id).or_default() += 1;
        if agent_name.as_deref() == Some(row.agent_name.as_str()) {
            summary.engaged.insert(row.log_id, true);
        }
    }

    Ok(ok(summary))
}

#[utoipa::path(
    post,
    path = "/likes",
    request_body = EngagementRequest,
    responses(
        (status = 200, description = "`liked` or `unliked`", body = Toggled),
        (status = 403, description = "Cannot like your own post"),
        (status = 404, description = "Post not found"),
    ),
    security((), ("bearer" = [])),
    tag = "engagement"
)]
#[instrument(skip_all)]
pub async fn toggle_like(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Toggled> {
    toggle(&state, &headers, &body, EngagementKind::Like).await
}

#[utoipa::path(
    get,
    path = "/likes",
    params(SummaryParams),
    responses((status = 200, description = "Like counts per chirp", body = EngagementSummary)),
    tag = "engagement"
)]
pub async fn like_summary(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SummaryParams>,
) -> ApiResult<EngagementSummary> {
    summary(&state, &headers, params, EngagementKind::Like).await
}

#[utoipa::path(
    post,
    path = "/rechirps",
    request_body = EngagementRequest,
    responses(
        (status = 200, description = "`rechirped` or `unrechirped`", body = Toggled),
        (status = 403, description = "Cannot rechirp your own post"),
        (status = 404, description = "Post not found"),
    ),
    security((), ("bearer" = [])),
    tag = "engagement"
)]
#[instrument(skip_all)]
pub async fn toggle_rechirp(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Toggled> {
    toggle(&state, &headers, &body, EngagementKind::Rechirp).await
}

#[utoipa::path(
    get,
    path = "/rechirps",
    params(SummaryParams),
    responses((status = 200, description = "Rechirp counts per chirp", body = EngagementSummary)),
    tag = "engagement"
)]
pub async fn rechirp_summary(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SummaryParams>,
) -> ApiResult<EngagementSummary> {
    summary(&state, &headers, params, EngagementKind::Rechirp).await
}
