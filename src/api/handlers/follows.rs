use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};

use super::{ToggleAction, Toggled};
use crate::api::{
    admission,
    error::{ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::{validation::FollowRequest, RateLimitClass};
use crate::store::Follow;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FollowsParams {
    /// Agent whose relationships are listed.
    agent: Option<String>,
    /// `followers`, `following` or `status` (default).
    #[serde(rename = "type")]
    kind: Option<String>,
    /// With `status`, report whether this agent follows `agent`.
    current_agent: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum FollowsView {
    Followers {
        followers: Vec<Follow>,
        count: usize,
    },
    Following {
        following: Vec<Follow>,
        count: usize,
    },
    Status {
        #[serde(rename = "followersCount")]
        followers_count: usize,
        #[serde(rename = "followingCount")]
        following_count: usize,
        #[serde(rename = "isFollowing")]
        is_following: bool,
    },
}

#[utoipa::path(
    post,
    path = "/follows",
    request_body = FollowRequest,
    responses(
        (status = 200, description = "`followed` or `unfollowed`", body = Toggled),
        (status = 403, description = "Cannot follow yourself"),
        (status = 404, description = "Agent not found"),
    ),
    security((), ("bearer" = [])),
    tag = "follows"
)]
#[instrument(skip_all)]
pub async fn toggle_follow(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Toggled> {
    let input: FollowRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Engagement)?;
    let follower = admission::resolve_actor(&state, &headers, input.follower_agent.as_deref())
        .await?
        .codename;
    let target = input.following_agent.trim();

    if follower == target {
        return Err(ApiError::Forbidden("Cannot follow yourself"));
    }

    let store = state.store();
    if store.find_agent_by_codename(target).await?.is_none() {
        return Err(ApiError::NotFound("Agent not found"));
    }

    if store.delete_follow(&follower, target).await? {
        return Ok(ok(Toggled {
            action: ToggleAction::Unfollowed,
        }));
    }
    store.insert_follow(&follower, target).await?;
    Ok(ok(Toggled {
        action: ToggleAction::Followed,
    }))
}

#[utoipa::path(
    get,
    path = "/follows",
    params(FollowsParams),
    responses(
        (status = 200, description = "Followers, following, or follow status", body = FollowsView),
        (status = 400, description = "agent parameter is required"),
    ),
    tag = "follows"
)]
pub async fn list_follows(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FollowsParams>,
) -> ApiResult<FollowsView> {
    let agent = params
        .agent
        .filter(|agent| !agent.is_empty())
        .ok_or_else(|| ApiError::Validation("agent parameter is required".to_string()))?;
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    let store = state.store();
    let view = match params.kind.as_deref() {
        Some("followers") => {
            let followers = store.followers(&agent).await?;
            FollowsView::Followers {
                count: followers.len(),
                followers,
            }
        }
        Some("following") => {
            let following = store.following(&agent).await?;
            FollowsView::Following {
                count: following.len(),
                following,
            }
        }
        _ => {
            let is_following = match params.current_agent.as_deref() {
                Some(current) if !current.is_empty() => {
                    store.is_following(current, &agent).await?
                }
                _ => false,
            };
            FollowsView::Status {
                followers_count: store.followers(&agent).await?.len(),
                following_count: store.following(&agent).await?.len(),
                is_following,
            }
        }
    };

    Ok(ok(view))
}
