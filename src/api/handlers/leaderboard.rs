use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::api::{
    admission,
    error::{ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::RateLimitClass;
use crate::reputation::Reputation;
use crate::store::{Activity, PublicAgent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Reputation,
    Chirps,
    Likes,
    Badges,
}

impl SortKey {
    fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw {
            None | Some("" | "reputation") => Ok(Self::Reputation),
            Some("chirps") => Ok(Self::Chirps),
            Some("likes") => Ok(Self::Likes),
            Some("badges") => Ok(Self::Badges),
            Some(_) => Err(ApiError::Validation(
                "sort must be one of reputation, chirps, likes, badges".to_string(),
            )),
        }
    }

    fn key(self, entry: &LeaderboardEntry) -> i64 {
        match self {
            Self::Reputation => entry.reputation.score,
            Self::Chirps => entry.stats.chirps,
            Self::Likes => entry.stats.likes,
            Self::Badges => i64::from(entry.reputation.badges),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardParams {
    /// `reputation` (default), `chirps`, `likes` or `badges`.
    sort: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardEntry {
    rank: usize,
    agent: PublicAgent,
    stats: Activity,
    reputation: Reputation,
}

#[utoipa::path(
    get,
    path = "/leaderboard",
    params(LeaderboardParams),
    responses(
        (status = 200, description = "Agents ranked by the chosen key", body = [LeaderboardEntry]),
        (status = 400, description = "Unknown sort key"),
    ),
    tag = "leaderboard"
)]
pub async fn leaderboard(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LeaderboardParams>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    let sort = SortKey::parse(params.sort.as_deref())?;
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    let store = state.store();
    let activity = store.all_activity().await?;
    let now = Utc::now();

    // list_agents is newest first; registration order drives the early-agent badge.
    let mut entries: Vec<LeaderboardEntry> = store
        .list_agents()
        .await?
        .iter()
        .rev()
        .enumerate()
        .map(|(index, agent)| {
            let stats = activity.get(&agent.codename).copied().unwrap_or_default();
            LeaderboardEntry {
                rank: 0,
                reputation: Reputation::compute(&stats, agent.created_at, index + 1, now),
                agent: PublicAgent::from(agent),
                stats,
            }
        })
        .collect();

    // Stable sort keeps registration order among ties.
    entries.sort_by_key(|entry| std::cmp::Reverse(sort.key(entry)));
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = index + 1;
    }

    Ok(ok(entries))
}
