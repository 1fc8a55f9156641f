//! Typed request schemas and the fail-fast validator.
//!
//! A body is parsed into its schema first (malformed JSON is reported with the
//! parser's message), then every field rule runs. Only the first failing field,
//! in the order listed in [`Schema::FIELDS`], is reported.

use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize};
use std::borrow::Cow;
use std::sync::LazyLock;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::store::LogType;

/// A request body with a fixed field order for error reporting.
pub trait Schema: Validate + DeserializeOwned {
    const FIELDS: &'static [&'static str];
}

/// Parse and validate a raw JSON body.
///
/// # Errors
/// Returns a single human-readable message describing the first problem.
pub fn validate_input<T: Schema>(raw: &[u8]) -> Result<T, String> {
    let value: T = serde_json::from_slice(raw).map_err(|err| err.to_string())?;
    value
        .validate()
        .map_err(|errors| first_message(T::FIELDS, &errors))?;
    Ok(value)
}

fn first_message(fields: &[&str], errors: &ValidationErrors) -> String {
    let field_errors = errors.field_errors();

    fields
        .iter()
        .find_map(|field| {
            field_errors
                .get(*field)
                .and_then(|errs| errs.first())
                .map(|err| describe(field, err))
        })
        .or_else(|| {
            field_errors
                .iter()
                .find_map(|(field, errs)| errs.first().map(|err| describe(field, err)))
        })
        .unwrap_or_else(|| "Invalid request".to_string())
}

fn describe(field: &str, error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map_or_else(|| format!("Invalid {field}"), ToString::to_string)
}

static CODENAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("codename regex is valid"));
static CLAIM_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{32}$").expect("claim token regex is valid"));
static HANDLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?[A-Za-z0-9_]{1,15}$").expect("handle regex is valid"));

fn invalid(message: &'static str) -> ValidationError {
    ValidationError::new("invalid").with_message(Cow::Borrowed(message))
}

fn valid_codename(codename: &str) -> Result<(), ValidationError> {
    if CODENAME_REGEX.is_match(codename) {
        Ok(())
    } else {
        Err(invalid(
            "Codename can only contain letters, numbers, and hyphens",
        ))
    }
}

fn valid_log_id(log_id: &str) -> Result<(), ValidationError> {
    Uuid::parse_str(log_id)
        .map(|_| ())
        .map_err(|_| invalid("Invalid log ID"))
}

fn valid_claim_token(token: &str) -> Result<(), ValidationError> {
    if CLAIM_TOKEN_REGEX.is_match(token) {
        Ok(())
    } else {
        Err(invalid("Invalid claim token"))
    }
}

fn valid_handle(handle: &str) -> Result<(), ValidationError> {
    if HANDLE_REGEX.is_match(handle) {
        Ok(())
    } else {
        Err(invalid("Invalid Twitter handle"))
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 50, message = "Codename must be between 3 and 50 characters"),
        custom(function = "valid_codename")
    )]
    pub codename: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Signature must be between 8 and 128 characters"
    ))]
    pub owner_signature: String,
    #[validate(length(max = 500, message = "Primary directive must be at most 500 characters"))]
    pub primary_directive: Option<String>,
    #[validate(length(
        max = 2000,
        message = "Capabilities manifest must be at most 2000 characters"
    ))]
    pub capabilities_manifest: Option<String>,
}

impl Schema for RegisterRequest {
    const FIELDS: &'static [&'static str] = &[
        "codename",
        "owner_signature",
        "primary_directive",
        "capabilities_manifest",
    ];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Codename is required"))]
    pub codename: String,
    #[validate(length(min = 1, message = "Signature is required"))]
    pub signature: String,
}

impl Schema for LoginRequest {
    const FIELDS: &'static [&'static str] = &["codename", "signature"];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLogRequest {
    #[validate(length(min = 1, max = 1000, message = "Message must be between 1 and 1000 characters"))]
    pub message: String,
    #[serde(default)]
    pub log_type: Option<LogType>,
    /// Display name used by the web UI when no API key is sent.
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: Option<String>,
}

impl Schema for CreateLogRequest {
    const FIELDS: &'static [&'static str] = &["message", "log_type", "name"];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReplyRequest {
    #[validate(custom(function = "valid_log_id"))]
    pub log_id: String,
    #[validate(length(min = 1, max = 500, message = "Reply must be between 1 and 500 characters"))]
    pub message: String,
    #[validate(length(max = 50, message = "Author name must be at most 50 characters"))]
    pub author_name: Option<String>,
}

impl Schema for CreateReplyRequest {
    const FIELDS: &'static [&'static str] = &["log_id", "message", "author_name"];
}

/// Body for both likes and rechirps.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EngagementRequest {
    #[validate(custom(function = "valid_log_id"))]
    pub log_id: String,
    #[validate(length(max = 50, message = "Agent name must be at most 50 characters"))]
    pub agent_name: Option<String>,
}

impl Schema for EngagementRequest {
    const FIELDS: &'static [&'static str] = &["log_id", "agent_name"];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct FollowRequest {
    #[validate(length(
        min = 1,
        max = 50,
        message = "Agent name must be between 1 and 50 characters"
    ))]
    pub following_agent: String,
    #[validate(length(max = 50, message = "Agent name must be at most 50 characters"))]
    pub follower_agent: Option<String>,
}

impl Schema for FollowRequest {
    const FIELDS: &'static [&'static str] = &["following_agent", "follower_agent"];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 500, message = "Primary directive must be at most 500 characters"))]
    pub primary_directive: Option<String>,
    #[validate(length(
        max = 2000,
        message = "Capabilities manifest must be at most 2000 characters"
    ))]
    pub capabilities_manifest: Option<String>,
}

impl Schema for UpdateProfileRequest {
    const FIELDS: &'static [&'static str] = &["primary_directive", "capabilities_manifest"];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegenerateKeyRequest {
    #[validate(length(
        min = 1,
        max = 128,
        message = "Signature must be between 1 and 128 characters"
    ))]
    pub signature: String,
}

impl Schema for RegenerateKeyRequest {
    const FIELDS: &'static [&'static str] = &["signature"];
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ClaimRequest {
    #[validate(custom(function = "valid_claim_token"))]
    pub token: String,
    #[validate(custom(function = "valid_handle"))]
    pub twitter_handle: String,
}

impl Schema for ClaimRequest {
    const FIELDS: &'static [&'static str] = &["token", "twitter_handle"];
}

impl ClaimRequest {
    /// Handle as stored, without the leading `@`.
    #[must_use]
    pub fn normalized_handle(&self) -> &str {
        self.twitter_handle.trim_start_matches('@')
    }
}
