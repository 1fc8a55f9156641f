//! Request admission primitives.
//!
//! Flow Overview: handlers validate the body (`validation`), ask the rate
//! limiter for a decision (`rate_limit`), then authenticate the caller either
//! with an API key (`api_key`) or with the owner passphrase (`password`).

pub mod api_key;
pub mod password;
pub mod rate_limit;
pub mod validation;

pub use api_key::{GeneratedKey, VerifyError};
pub use password::{HashPolicy, SecretHasher};
pub use rate_limit::{
    FixedWindowLimiter, NoopRateLimiter, RateLimitClass, RateLimitDecision, RateLimitPolicy,
    RateLimiter, RateLimits,
};

/// Why a credential was rejected.
///
/// Each variant maps to a stable `code` so clients can tell a malformed header
/// apart from a well-formed key that matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("No authorization header")]
    MissingAuth,
    #[error("{0}")]
    MalformedAuth(&'static str),
    #[error("Invalid API key")]
    InvalidKey,
    #[error("Invalid codename or signature")]
    InvalidCredentials,
    /// The web UI named an agent that does not exist.
    #[error("Invalid agent")]
    InvalidAgent,
}

impl AuthFailure {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingAuth => "MISSING_AUTH",
            Self::MalformedAuth(_) => "MALFORMED_AUTH",
            Self::InvalidKey => "INVALID_KEY",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidAgent => "INVALID_AGENT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AuthFailure;

    #[test]
    fn malformed_and_invalid_key_have_distinct_codes() {
        assert_ne!(
            AuthFailure::MalformedAuth("bad").code(),
            AuthFailure::InvalidKey.code()
        );
        assert_eq!(AuthFailure::MalformedAuth("bad").to_string(), "bad");
    }
}
