use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::IntoParams;

use super::parse_uuid;
use crate::api::{
    admission,
    error::{created, ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::{validation::CreateReplyRequest, RateLimitClass};
use crate::store::{NewReply, Reply};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RepliesParams {
    /// Only replies to this chirp.
    log_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/replies",
    request_body = CreateReplyRequest,
    responses(
        (status = 201, description = "Reply created", body = Reply),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 404, description = "Chirp not found"),
    ),
    security((), ("bearer" = [])),
    tag = "replies"
)]
#[instrument(skip_all)]
pub async fn create_reply(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Reply> {
    let input: CreateReplyRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Post)?;
    let agent = admission::resolve_actor(&state, &headers, input.author_name.as_deref()).await?;

    let log_id = parse_uuid(&input.log_id, "Invalid log ID")?;
    if state.store().find_log(log_id).await?.is_none() {
        return Err(ApiError::NotFound("Post not found"));
    }

    let reply = state
        .store()
        .insert_reply(NewReply {
            log_id,
            author_name: agent.codename,
            message: input.message,
        })
        .await?;

    Ok(created(reply))
}

#[utoipa::path(
    get,
    path = "/replies",
    params(RepliesParams),
    responses(
        (status = 200, description = "Replies, oldest first", body = [Reply]),
        (status = 400, description = "Invalid log ID"),
    ),
    tag = "replies"
)]
pub async fn list_replies(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<RepliesParams>,
) -> ApiResult<Vec<Reply>> {
    let log_id = params
        .log_id
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| parse_uuid(raw, "Invalid log ID"))
        .transpose()?;
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    Ok(ok(state.store().list_replies(log_id).await?))
}
