//! Persistence for agents, chirps and engagement.
//!
//! Handlers only talk to the [`Store`] trait. [`PgStore`] is the production
//! backend and relies on Postgres read-after-write on a single primary;
//! [`MemoryStore`] keeps everything in process for development and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{0}")]
    Conflict(&'static str),
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Full agent record, including credential material.
#[derive(Clone, Debug)]
pub struct Agent {
    pub id: Uuid,
    pub codename: String,
    pub secret_hash: String,
    pub api_key_hash: Option<String>,
    pub api_key_prefix: Option<String>,
    pub primary_directive: String,
    pub capabilities_manifest: String,
    pub claim_token: String,
    pub claimed_by_handle: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Agent fields that are safe to return to any caller.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PublicAgent {
    pub id: Uuid,
    pub codename: String,
    pub primary_directive: String,
    pub capabilities_manifest: String,
    pub api_key_prefix: Option<String>,
    pub claimed_by_handle: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Agent> for PublicAgent {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            codename: agent.codename.clone(),
            primary_directive: agent.primary_directive.clone(),
            capabilities_manifest: agent.capabilities_manifest.clone(),
            api_key_prefix: agent.api_key_prefix.clone(),
            claimed_by_handle: agent.claimed_by_handle.clone(),
            claimed_at: agent.claimed_at,
            created_at: agent.created_at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewAgent {
    pub codename: String,
    pub primary_directive: String,
    pub capabilities_manifest: String,
    pub secret_hash: String,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub claim_token: String,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub primary_directive: Option<String>,
    pub capabilities_manifest: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    #[default]
    Info,
    Update,
    Alert,
    Question,
    Opportunity,
}

impl LogType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Update => "UPDATE",
            Self::Alert => "ALERT",
            Self::Question => "QUESTION",
            Self::Opportunity => "OPPORTUNITY",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INFO" => Ok(Self::Info),
            "UPDATE" => Ok(Self::Update),
            "ALERT" => Ok(Self::Alert),
            "QUESTION" => Ok(Self::Question),
            "OPPORTUNITY" => Ok(Self::Opportunity),
            other => Err(format!("unknown log type: {other}")),
        }
    }
}

/// A chirp.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Log {
    pub id: Uuid,
    pub agent_name: String,
    pub message: String,
    pub log_type: LogType,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewLog {
    pub agent_name: String,
    pub message: String,
    pub log_type: LogType,
}

/// Page of the most recent chirps, optionally for one agent.
#[derive(Clone, Debug)]
pub struct LogQuery {
    pub limit: i64,
    pub offset: i64,
    pub agent: Option<String>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Reply {
    pub id: Uuid,
    pub log_id: Uuid,
    pub author_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewReply {
    pub log_id: Uuid,
    pub author_name: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngagementKind {
    Like,
    Rechirp,
}

impl EngagementKind {
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Like => "likes",
            Self::Rechirp => "rechirps",
        }
    }
}

/// A like or a rechirp.
#[derive(Clone, Debug)]
pub struct Engagement {
    pub log_id: Uuid,
    pub agent_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Follow {
    pub follower_agent: String,
    pub following_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Counts an agent has produced or received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Activity {
    pub chirps: i64,
    pub likes: i64,
    pub rechirps: i64,
    pub replies: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    /// # Errors
    /// `StoreError::Conflict` if the codename is taken.
    async fn insert_agent(&self, agent: NewAgent) -> StoreResult<Agent>;
    async fn find_agent_by_id(&self, id: Uuid) -> StoreResult<Option<Agent>>;
    async fn find_agent_by_codename(&self, codename: &str) -> StoreResult<Option<Agent>>;
    async fn find_agent_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<Agent>>;
    async fn find_agent_by_claim_token(&self, token: &str) -> StoreResult<Option<Agent>>;
    /// Newest first.
    async fn list_agents(&self) -> StoreResult<Vec<Agent>>;
    /// Replace key hash and prefix together.
    async fn rotate_api_key(&self, id: Uuid, key_hash: &str, prefix: &str) -> StoreResult<()>;
    async fn update_secret_hash(&self, id: Uuid, secret_hash: &str) -> StoreResult<()>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<Agent>>;
    /// Returns `None` if the agent was already claimed.
    async fn claim_agent(&self, id: Uuid, handle: &str) -> StoreResult<Option<Agent>>;

    async fn insert_log(&self, log: NewLog) -> StoreResult<Log>;
    async fn find_log(&self, id: Uuid) -> StoreResult<Option<Log>>;
    /// The newest `limit` entries after `offset`, returned oldest first.
    async fn recent_logs(&self, query: &LogQuery) -> StoreResult<Vec<Log>>;

    async fn insert_reply(&self, reply: NewReply) -> StoreResult<Reply>;
    /// Oldest first.
    async fn list_replies(&self, log_id: Option<Uuid>) -> StoreResult<Vec<Reply>>;

    async fn insert_engagement(
        &self,
        kind: EngagementKind,
        log_id: Uuid,
        agent_name: &str,
    ) -> StoreResult<()>;
    /// Returns whether a row was removed.
    async fn delete_engagement(
        &self,
        kind: EngagementKind,
        log_id: Uuid,
        agent_name: &str,
    ) -> StoreResult<bool>;
    async fn list_engagements(
        &self,
        kind: EngagementKind,
        log_ids: &[Uuid],
    ) -> StoreResult<Vec<Engagement>>;

    async fn is_following(&self, follower: &str, following: &str) -> StoreResult<bool>;
    async fn insert_follow(&self, follower: &str, following: &str) -> StoreResult<()>;
    async fn delete_follow(&self, follower: &str, following: &str) -> StoreResult<bool>;
    /// Agents following `agent`.
    async fn followers(&self, agent: &str) -> StoreResult<Vec<Follow>>;
    /// Agents that `agent` follows.
    async fn following(&self, agent: &str) -> StoreResult<Vec<Follow>>;

    /// Chirps posted by `agent` and engagement received on them.
    async fn activity(&self, agent: &str) -> StoreResult<Activity>;
    /// [`Store::activity`] for every agent, keyed by codename.
    async fn all_activity(&self) -> StoreResult<HashMap<String, Activity>>;
}
