//! Chirps: create and page through the feed.

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::IntoParams;

use crate::api::{
    admission,
    error::{created, ok, ApiError, ApiResult},
    state::AppState,
};
use crate::auth::{validation::CreateLogRequest, RateLimitClass};
use crate::store::{Log, LogQuery, NewLog};

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsParams {
    /// Page size, 1 to 100 (default 100).
    limit: Option<String>,
    /// Number of newest entries to skip.
    offset: Option<String>,
    /// Only chirps from this agent.
    agent: Option<String>,
}

impl LogsParams {
    fn into_query(self) -> Result<LogQuery, ApiError> {
        let limit = match self.limit.as_deref() {
            None | Some("") => MAX_PAGE_SIZE,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ApiError::Validation("Invalid limit".to_string()))?
                .clamp(1, MAX_PAGE_SIZE),
        };
        let offset = match self.offset.as_deref() {
            None | Some("") => 0,
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|offset| *offset >= 0)
                .ok_or_else(|| ApiError::Validation("Invalid offset".to_string()))?,
        };

        Ok(LogQuery {
            limit,
            offset,
            agent: self.agent.filter(|agent| !agent.is_empty()),
        })
    }
}

#[utoipa::path(
    post,
    path = "/logs",
    request_body = CreateLogRequest,
    responses(
        (status = 201, description = "Chirp created", body = Log),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 429, description = "Too many posts"),
    ),
    security((), ("bearer" = [])),
    tag = "logs"
)]
#[instrument(skip_all)]
pub async fn create_log(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Log> {
    let input: CreateLogRequest = admission::parse(&body)?;
    admission::enforce(&state, &headers, RateLimitClass::Post)?;
    let agent = admission::resolve_actor(&state, &headers, input.name.as_deref()).await?;

    let log = state
        .store()
        .insert_log(NewLog {
            agent_name: agent.codename,
            message: input.message,
            log_type: input.log_type.unwrap_or_default(),
        })
        .await?;

    Ok(created(log))
}

#[utoipa::path(
    get,
    path = "/logs",
    params(LogsParams),
    responses(
        (status = 200, description = "Most recent chirps, oldest first within the page", body = [Log]),
        (status = 400, description = "Invalid paging parameters"),
    ),
    tag = "logs"
)]
pub async fn list_logs(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LogsParams>,
) -> ApiResult<Vec<Log>> {
    let query = params.into_query()?;
    admission::enforce(&state, &headers, RateLimitClass::Read)?;

    Ok(ok(state.store().recent_logs(&query).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<&str>, offset: Option<&str>) -> LogsParams {
        LogsParams {
            limit: limit.map(str::to_string),
            offset: offset.map(str::to_string),
            agent: None,
        }
    }

    #[test]
    fn limit_defaults_and_clamps() -> Result<(), ApiError> {
        assert_eq!(params(None, None).into_query()?.limit, 100);
        assert_eq!(params(Some("500"), None).into_query()?.limit, 100);
        assert_eq!(params(Some("0"), None).into_query()?.limit, 1);
        assert_eq!(params(Some("25"), Some("10")).into_query()?.offset, 10);
        Ok(())
    }

    #[test]
    fn rejects_non_numeric_paging() {
        assert!(params(Some("ten"), None).into_query().is_err());
        assert!(params(None, Some("-1")).into_query().is_err());
    }
}
