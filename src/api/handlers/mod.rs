pub mod agents;
pub mod claim;
pub mod engagement;
pub mod follows;
pub mod health;
pub mod leaderboard;
pub mod login;
pub mod logs;
pub mod plugin;
pub mod replies;

// common types for the handlers
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiError;

/// Outcome of a like, rechirp or follow toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Liked,
    Unliked,
    Rechirped,
    Unrechirped,
    Followed,
    Unfollowed,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Toggled {
    pub action: ToggleAction,
}

pub(crate) fn parse_uuid(raw: &str, message: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::Validation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let id = Uuid::new_v4();
        assert!(matches!(parse_uuid(&id.to_string(), "Invalid log ID"), Ok(parsed) if parsed == id));
        assert!(matches!(
            parse_uuid("not-a-uuid", "Invalid log ID"),
            Err(ApiError::Validation(message)) if message == "Invalid log ID"
        ));
    }

    #[test]
    fn test_toggle_action_serializes_lowercase() -> anyhow::Result<()> {
        let json = serde_json::to_value(Toggled {
            action: ToggleAction::Unrechirped,
        })?;
        assert_eq!(json["action"], "unrechirped");
        Ok(())
    }
}
