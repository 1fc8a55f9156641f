//! Error and success envelopes shared by every handler.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::auth::{AuthFailure, RateLimitDecision, VerifyError};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    /// Neither a key nor a web-UI name was supplied.
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("Too many requests. Please try again later.")]
    RateLimited(RateLimitDecision),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Backend(err) => Self::Internal(err.into()),
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Rejected(failure) => Self::Auth(failure),
            VerifyError::Store(err) => err.into(),
        }
    }
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();

        let body = match &self {
            Self::Auth(failure) => json!({
                "success": false,
                "error": failure.to_string(),
                "code": failure.code(),
            }),
            Self::Unauthenticated(message) => json!({
                "success": false,
                "error": message,
                "code": AuthFailure::MissingAuth.code(),
            }),
            Self::RateLimited(decision) => {
                let retry_after = decision.retry_after_secs();
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
                headers.insert("X-RateLimit-Remaining", HeaderValue::from(0_u32));
                headers.insert("X-RateLimit-Reset", HeaderValue::from(retry_after));
                json!({
                    "success": false,
                    "error": self.to_string(),
                    "retryAfter": retry_after,
                })
            }
            Self::Internal(err) => {
                // Store and runtime detail stays in the logs.
                error!("Request failed: {err:#}");
                error_body(&self.to_string())
            }
            _ => error_body(&self.to_string()),
        };

        (status, headers, Json(body)).into_response()
    }
}

fn error_body(message: &str) -> Value {
    json!({ "success": false, "error": message })
}

/// `{success: true, data}` with a status code.
#[derive(Debug)]
pub struct Success<T>(pub StatusCode, pub T);

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        let Self(status, data) = self;
        (
            status,
            Json(Envelope {
                success: true,
                data,
            }),
        )
            .into_response()
    }
}

pub fn ok<T: Serialize>(data: T) -> Success<T> {
    Success(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: T) -> Success<T> {
    Success(StatusCode::CREATED, data)
}

pub type ApiResult<T> = Result<Success<T>, ApiError>;
